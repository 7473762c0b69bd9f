//! Workflow AST (§3) and the YAML/JSON source parser (§4.3).
//!
//! [`parser`] turns a source byte slice into the typed tree defined here.
//! The AST is immutable for the life of an execution (§3 Lifecycles): the
//! engine never mutates a parsed `Workflow`, only the scope tree it drives
//! against it.

pub mod parser;

use crate::expr::Expr;
use indexmap::IndexMap;

/// A parsed workflow document: a required `main` subworkflow plus zero or
/// more named subworkflows (§3).
#[derive(Debug, Clone)]
pub struct Workflow {
    pub main: Subworkflow,
    pub subworkflows: IndexMap<String, Subworkflow>,
}

impl Workflow {
    pub fn subworkflow(&self, name: &str) -> Option<&Subworkflow> {
        if name == "main" {
            Some(&self.main)
        } else {
            self.subworkflows.get(name)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subworkflow {
    pub name: String,
    pub params: Vec<Param>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Kept unevaluated; evaluated in the caller's scope at call time (§4.3).
    pub default: Option<Expr>,
    pub has_default: bool,
}

/// A single step. At most one of the action facets is populated in a
/// well-formed source; `next` may additionally ride along with `assign`.
/// The engine processes these fields in the fixed order given in §4.6.
#[derive(Debug, Clone, Default)]
pub struct Step {
    pub name: String,
    pub steps: Option<Vec<Step>>,
    pub assign: Option<Vec<(Expr, Expr)>>,
    pub call: Option<CallSpec>,
    pub switch: Option<Vec<SwitchCase>>,
    pub for_loop: Option<ForSpec>,
    pub try_block: Option<TrySpec>,
    pub parallel: Option<ParallelSpec>,
    pub raise: Option<Expr>,
    /// `Some(expr)` means the step carries a `return:` (possibly of `null`);
    /// `None` means no `return:` was present at all (§3 Invariants).
    pub return_expr: Option<Expr>,
    pub next: Option<NextTarget>,
}

#[derive(Debug, Clone)]
pub struct CallSpec {
    /// Dotted function/subworkflow name, e.g. `http.get` or `greet`.
    pub function: String,
    pub args: IndexMap<String, Expr>,
    pub result: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// `None` condition always matches (the `else`/default branch).
    pub condition: Option<Expr>,
    pub next: Option<NextTarget>,
    pub steps: Option<Vec<Step>>,
    pub assign: Option<Vec<(Expr, Expr)>>,
    pub return_expr: Option<Expr>,
    pub raise: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ForSpec {
    pub value_var: String,
    pub index_var: Option<String>,
    pub iterable: ForIterable,
    pub body: Vec<Step>,
}

#[derive(Debug, Clone)]
pub enum ForIterable {
    In(Expr),
    Range(Expr, Expr),
}

#[derive(Debug, Clone)]
pub struct TrySpec {
    pub body: Vec<Step>,
    pub except: Option<ExceptSpec>,
    pub retry: Option<RetrySpec>,
}

#[derive(Debug, Clone)]
pub struct ExceptSpec {
    pub as_var: Option<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct RetrySpec {
    pub predicate: String,
    pub max_retries: i64,
    pub backoff: BackoffSpec,
}

#[derive(Debug, Clone)]
pub struct BackoffSpec {
    pub initial: f64,
    pub max: f64,
    pub multiplier: f64,
}

impl Default for BackoffSpec {
    fn default() -> Self {
        // §4.3 default backoff.
        BackoffSpec {
            initial: 1.0,
            max: 60.0,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParallelSpec {
    pub shared: Vec<String>,
    pub branches: Option<Vec<Vec<Step>>>,
    pub for_loop: Option<ForSpec>,
    /// 0 means "use the default of 20" (§4.3).
    pub concurrency_limit: i64,
    pub exception_policy: ExceptionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExceptionPolicy {
    #[default]
    Unhandled,
    ContinueAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextTarget {
    Name(String),
    End,
    Break,
    Continue,
}

impl NextTarget {
    pub fn parse(s: &str) -> NextTarget {
        match s {
            "end" => NextTarget::End,
            "break" => NextTarget::Break,
            "continue" => NextTarget::Continue,
            other => NextTarget::Name(other.to_string()),
        }
    }
}
