//! YAML/JSON workflow source parser (§4.3, §6.3).
//!
//! Source is bounded at 128 KiB. The document is a YAML (or JSON, which is
//! a YAML subset) mapping whose top-level keys are subworkflow names, one
//! of which must be `main`. Scalars that hold expressions are routed
//! through the four-case value-parser wrapper (§4.2): a bare YAML scalar
//! or an embedded `${...}` is parsed as an `Expr`; composite YAML (lists,
//! maps) recurses the same way field-by-field.

use super::{
    BackoffSpec, CallSpec, ExceptSpec, ExceptionPolicy, ForIterable, ForSpec, NextTarget, Param,
    ParallelSpec, RetrySpec, Step, SwitchCase, Subworkflow, TrySpec, Workflow,
};
use crate::expr::{parse_value_expr, quote_map_literals, Expr};
use crate::scope::parse_assign_target;
use indexmap::IndexMap;
use serde_yaml::Value as Yaml;
use thiserror::Error;

pub use crate::limits::MAX_SOURCE_BYTES;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("workflow source of {0} bytes exceeds the 128 KiB limit")]
    TooLarge(usize),
    #[error("source is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("YAML/JSON parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("document has no 'main' subworkflow")]
    MissingMain,
    #[error("top-level entry '{0}' must be a mapping")]
    TopLevelNotMapping(String),
    #[error("workflow document must be a mapping")]
    DocumentNotMapping,
    #[error("unknown key '{key}' in subworkflow '{workflow}'")]
    UnknownSubworkflowKey { workflow: String, key: String },
    #[error("subworkflow '{0}' is missing 'steps'")]
    MissingSteps(String),
    #[error("'steps' in subworkflow '{0}' must be a sequence")]
    StepsNotSequence(String),
    #[error("'params' in subworkflow '{0}' must be a sequence")]
    ParamsNotSequence(String),
    #[error("invalid param entry in subworkflow '{0}'")]
    InvalidParam(String),
    #[error("step must be a single-key mapping of {{ name: body }}")]
    StepNotSingleKeyMapping,
    #[error("step '{0}' body must be a mapping")]
    StepBodyNotMapping(String),
    #[error("unknown key '{key}' in step '{step}'")]
    UnknownStepKey { step: String, key: String },
    #[error("duplicate step name '{0}' in the same step list")]
    DuplicateStepName(String),
    #[error("assign entry in step '{0}' must be a single-key mapping")]
    InvalidAssignEntry(String),
    #[error("'for' in step '{0}' requires 'value'")]
    ForMissingValue(String),
    #[error("'for' in step '{0}' requires either 'in' or 'range'")]
    ForMissingIterable(String),
    #[error("'range' in step '{0}' must be a two-element sequence")]
    InvalidRange(String),
    #[error("'call' in step '{0}' must name a function")]
    InvalidCallTarget(String),
    #[error("'switch' in step '{0}' must be a sequence")]
    SwitchNotSequence(String),
    #[error("'parallel' in step '{0}' requires either 'branches' or 'for'")]
    ParallelMissingWork(String),
    #[error("'branches' in step '{0}' must be a sequence")]
    BranchesNotSequence(String),
    #[error(transparent)]
    Expr(#[from] crate::expr::ParseError),
}

/// Parse a full workflow document from a byte slice (§4.3).
pub fn parse_source(bytes: &[u8]) -> Result<Workflow, ParseError> {
    if bytes.len() > MAX_SOURCE_BYTES {
        return Err(ParseError::TooLarge(bytes.len()));
    }
    let text = std::str::from_utf8(bytes)?;
    let quoted = quote_map_literals(text);
    let doc: Yaml = serde_yaml::from_str(&quoted)?;
    let Yaml::Mapping(top) = doc else {
        return Err(ParseError::DocumentNotMapping);
    };

    let mut main: Option<Subworkflow> = None;
    let mut subworkflows = IndexMap::new();
    for (k, v) in &top {
        let name = yaml_key_string(k);
        let Yaml::Mapping(body) = v else {
            return Err(ParseError::TopLevelNotMapping(name));
        };
        let sub = parse_subworkflow(&name, body)?;
        if name == "main" {
            main = Some(sub);
        } else {
            subworkflows.insert(name, sub);
        }
    }

    Ok(Workflow {
        main: main.ok_or(ParseError::MissingMain)?,
        subworkflows,
    })
}

fn yaml_key_string(v: &Yaml) -> String {
    match v {
        Yaml::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn get<'a>(map: &'a serde_yaml::Mapping, key: &str) -> Option<&'a Yaml> {
    map.get(Yaml::String(key.to_string()))
}

fn parse_subworkflow(name: &str, body: &serde_yaml::Mapping) -> Result<Subworkflow, ParseError> {
    for (k, _) in body {
        let key = yaml_key_string(k);
        if key != "params" && key != "steps" {
            return Err(ParseError::UnknownSubworkflowKey {
                workflow: name.to_string(),
                key,
            });
        }
    }
    let params = match get(body, "params") {
        None => Vec::new(),
        Some(Yaml::Sequence(seq)) => seq
            .iter()
            .map(|entry| parse_param(name, entry))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(ParseError::ParamsNotSequence(name.to_string())),
    };
    let steps = match get(body, "steps") {
        None => return Err(ParseError::MissingSteps(name.to_string())),
        Some(Yaml::Sequence(seq)) => parse_steps(seq)?,
        Some(_) => return Err(ParseError::StepsNotSequence(name.to_string())),
    };
    Ok(Subworkflow {
        name: name.to_string(),
        params,
        steps,
    })
}

/// A param entry is either a bare scalar name or a single-key mapping of
/// `{ name: default }` (§4.3).
fn parse_param(workflow: &str, entry: &Yaml) -> Result<Param, ParseError> {
    match entry {
        Yaml::String(s) => Ok(Param {
            name: s.clone(),
            default: None,
            has_default: false,
        }),
        Yaml::Mapping(m) if m.len() == 1 => {
            let (k, v) = m.iter().next().unwrap();
            Ok(Param {
                name: yaml_key_string(k),
                default: Some(yaml_to_expr(v)?),
                has_default: true,
            })
        }
        _ => Err(ParseError::InvalidParam(workflow.to_string())),
    }
}

fn parse_steps(seq: &[Yaml]) -> Result<Vec<Step>, ParseError> {
    let mut out = Vec::with_capacity(seq.len());
    let mut seen = std::collections::HashSet::new();
    for entry in seq {
        let step = parse_step(entry)?;
        if !seen.insert(step.name.clone()) {
            return Err(ParseError::DuplicateStepName(step.name.clone()));
        }
        out.push(step);
    }
    Ok(out)
}

const STEP_KEYS: &[&str] = &[
    "assign", "call", "args", "result", "switch", "for", "parallel", "try", "except", "retry",
    "raise", "return", "next", "steps",
];

fn parse_step(entry: &Yaml) -> Result<Step, ParseError> {
    let Yaml::Mapping(outer) = entry else {
        return Err(ParseError::StepNotSingleKeyMapping);
    };
    if outer.len() != 1 {
        return Err(ParseError::StepNotSingleKeyMapping);
    }
    let (name_node, body_node) = outer.iter().next().unwrap();
    let name = yaml_key_string(name_node);
    let Yaml::Mapping(body) = body_node else {
        return Err(ParseError::StepBodyNotMapping(name));
    };
    for (k, _) in body {
        let key = yaml_key_string(k);
        if !STEP_KEYS.contains(&key.as_str()) {
            return Err(ParseError::UnknownStepKey { step: name, key });
        }
    }

    let mut step = Step {
        name: name.clone(),
        ..Default::default()
    };

    if let Some(Yaml::Sequence(seq)) = get(body, "steps") {
        step.steps = Some(parse_steps(seq)?);
    }
    if let Some(Yaml::Sequence(seq)) = get(body, "assign") {
        step.assign = Some(parse_assign_list(&name, seq)?);
    }
    if get(body, "call").is_some() {
        step.call = Some(parse_call(&name, body)?);
    }
    if let Some(v) = get(body, "switch") {
        let Yaml::Sequence(seq) = v else {
            return Err(ParseError::SwitchNotSequence(name));
        };
        step.switch = Some(seq.iter().map(parse_switch_case).collect::<Result<_, _>>()?);
    }
    if let Some(Yaml::Mapping(for_body)) = get(body, "for") {
        step.for_loop = Some(parse_for(&name, for_body)?);
    }
    if get(body, "try").is_some() {
        step.try_block = Some(parse_try(&name, body)?);
    }
    if let Some(Yaml::Mapping(par)) = get(body, "parallel") {
        step.parallel = Some(parse_parallel(&name, par)?);
    }
    if let Some(v) = get(body, "raise") {
        step.raise = Some(yaml_to_expr(v)?);
    }
    if let Some(v) = get(body, "return") {
        step.return_expr = Some(yaml_to_expr(v)?);
    }
    if let Some(Yaml::String(s)) = get(body, "next") {
        step.next = Some(NextTarget::parse(s));
    }

    Ok(step)
}

/// `assign: [{x: 10}, {y: 20}, ...]` — each entry a single target/value pair.
fn parse_assign_list(step: &str, seq: &[Yaml]) -> Result<Vec<(Expr, Expr)>, ParseError> {
    seq.iter()
        .map(|entry| {
            let Yaml::Mapping(m) = entry else {
                return Err(ParseError::InvalidAssignEntry(step.to_string()));
            };
            if m.len() != 1 {
                return Err(ParseError::InvalidAssignEntry(step.to_string()));
            }
            let (k, v) = m.iter().next().unwrap();
            let target_str = yaml_key_string(k);
            let target = parse_assign_target(&target_str)?;
            let value = yaml_to_expr(v)?;
            Ok((target, value))
        })
        .collect()
}

fn parse_call(step: &str, body: &serde_yaml::Mapping) -> Result<CallSpec, ParseError> {
    let function = match get(body, "call") {
        Some(Yaml::String(s)) => s.clone(),
        _ => return Err(ParseError::InvalidCallTarget(step.to_string())),
    };
    let mut args = IndexMap::new();
    if let Some(Yaml::Mapping(m)) = get(body, "args") {
        for (k, v) in m {
            args.insert(yaml_key_string(k), yaml_to_expr(v)?);
        }
    }
    let result = match get(body, "result") {
        Some(Yaml::String(s)) => Some(s.clone()),
        _ => None,
    };
    Ok(CallSpec {
        function,
        args,
        result,
    })
}

fn parse_switch_case(entry: &Yaml) -> Result<SwitchCase, ParseError> {
    let Yaml::Mapping(m) = entry else {
        return Err(ParseError::StepBodyNotMapping("switch".to_string()));
    };
    let condition = match get(m, "condition") {
        Some(v) => Some(yaml_to_expr(v)?),
        None => None,
    };
    let next = match get(m, "next") {
        Some(Yaml::String(s)) => Some(NextTarget::parse(s)),
        _ => None,
    };
    let steps = match get(m, "steps") {
        Some(Yaml::Sequence(seq)) => Some(parse_steps(seq)?),
        _ => None,
    };
    let assign = match get(m, "assign") {
        Some(Yaml::Sequence(seq)) => Some(parse_assign_list("switch", seq)?),
        _ => None,
    };
    let return_expr = match get(m, "return") {
        Some(v) => Some(yaml_to_expr(v)?),
        None => None,
    };
    let raise = match get(m, "raise") {
        Some(v) => Some(yaml_to_expr(v)?),
        None => None,
    };
    Ok(SwitchCase {
        condition,
        next,
        steps,
        assign,
        return_expr,
        raise,
    })
}

fn parse_for(step: &str, m: &serde_yaml::Mapping) -> Result<ForSpec, ParseError> {
    let value_var = match get(m, "value") {
        Some(Yaml::String(s)) => s.clone(),
        _ => return Err(ParseError::ForMissingValue(step.to_string())),
    };
    let index_var = match get(m, "index") {
        Some(Yaml::String(s)) => Some(s.clone()),
        _ => None,
    };
    let iterable = if let Some(v) = get(m, "in") {
        ForIterable::In(yaml_to_expr(v)?)
    } else if let Some(Yaml::Sequence(range)) = get(m, "range") {
        if range.len() != 2 {
            return Err(ParseError::InvalidRange(step.to_string()));
        }
        ForIterable::Range(yaml_to_expr(&range[0])?, yaml_to_expr(&range[1])?)
    } else {
        return Err(ParseError::ForMissingIterable(step.to_string()));
    };
    let body = match get(m, "steps") {
        Some(Yaml::Sequence(seq)) => parse_steps(seq)?,
        _ => return Err(ParseError::MissingSteps(format!("for in step '{step}'"))),
    };
    Ok(ForSpec {
        value_var,
        index_var,
        iterable,
        body,
    })
}

/// `try` may hold `{steps: [...]}` or a single implied call step directly
/// (§4.3): `{call: ..., args: ..., result: ...}`. `except`/`retry` sit as
/// siblings of `try` on the enclosing step body.
fn parse_try(step: &str, body: &serde_yaml::Mapping) -> Result<TrySpec, ParseError> {
    let Some(Yaml::Mapping(try_body)) = get(body, "try") else {
        return Err(ParseError::StepBodyNotMapping(step.to_string()));
    };
    let try_steps = if let Some(Yaml::Sequence(seq)) = get(try_body, "steps") {
        parse_steps(seq)?
    } else if get(try_body, "call").is_some() {
        vec![Step {
            name: format!("{step}.try"),
            call: Some(parse_call(step, try_body)?),
            ..Default::default()
        }]
    } else {
        return Err(ParseError::MissingSteps(format!("try in step '{step}'")));
    };

    let except = match get(body, "except") {
        Some(Yaml::Mapping(m)) => {
            let as_var = match get(m, "as") {
                Some(Yaml::String(s)) => Some(s.clone()),
                _ => None,
            };
            let steps = match get(m, "steps") {
                Some(Yaml::Sequence(seq)) => parse_steps(seq)?,
                _ => return Err(ParseError::MissingSteps(format!("except in step '{step}'"))),
            };
            Some(ExceptSpec { as_var, steps })
        }
        _ => None,
    };

    let retry = match get(body, "retry") {
        Some(Yaml::String(predicate)) => Some(RetrySpec {
            predicate: predicate.clone(),
            max_retries: 0,
            backoff: BackoffSpec::default(),
        }),
        Some(Yaml::Mapping(m)) => {
            let predicate = match get(m, "predicate") {
                Some(Yaml::String(s)) => s.clone(),
                _ => "retry.always".to_string(),
            };
            let max_retries = match get(m, "max_retries") {
                Some(Yaml::Number(n)) => n.as_i64().unwrap_or(0),
                _ => 0,
            };
            let backoff = match get(m, "backoff") {
                Some(Yaml::Mapping(b)) => BackoffSpec {
                    initial: num_or(get(b, "initial"), 1.0),
                    max: num_or(get(b, "max"), 60.0),
                    multiplier: num_or(get(b, "multiplier").or_else(|| get(b, "mult")), 2.0),
                },
                _ => BackoffSpec::default(),
            };
            Some(RetrySpec {
                predicate,
                max_retries,
                backoff,
            })
        }
        _ => None,
    };

    Ok(TrySpec {
        body: try_steps,
        except,
        retry,
    })
}

fn num_or(v: Option<&Yaml>, default: f64) -> f64 {
    match v {
        Some(Yaml::Number(n)) => n.as_f64().unwrap_or(default),
        _ => default,
    }
}

fn parse_parallel(step: &str, m: &serde_yaml::Mapping) -> Result<ParallelSpec, ParseError> {
    let shared = match get(m, "shared") {
        Some(Yaml::Sequence(seq)) => seq
            .iter()
            .filter_map(|v| match v {
                Yaml::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let branches = match get(m, "branches") {
        Some(Yaml::Sequence(seq)) => Some(
            seq.iter()
                .map(|b| {
                    let Yaml::Mapping(bm) = b else {
                        return Err(ParseError::BranchesNotSequence(step.to_string()));
                    };
                    match get(bm, "steps") {
                        Some(Yaml::Sequence(s)) => parse_steps(s),
                        _ => Err(ParseError::MissingSteps(format!("branch in step '{step}'"))),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Some(_) => return Err(ParseError::BranchesNotSequence(step.to_string())),
        None => None,
    };
    let for_loop = match get(m, "for") {
        Some(Yaml::Mapping(fm)) => Some(parse_for(step, fm)?),
        _ => None,
    };
    if branches.is_none() && for_loop.is_none() {
        return Err(ParseError::ParallelMissingWork(step.to_string()));
    }
    let concurrency_limit = match get(m, "concurrency_limit") {
        Some(Yaml::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    };
    let exception_policy = match get(m, "exception_policy") {
        Some(Yaml::String(s)) if s == "continueAll" => ExceptionPolicy::ContinueAll,
        _ => ExceptionPolicy::Unhandled,
    };
    Ok(ParallelSpec {
        shared,
        branches,
        for_loop,
        concurrency_limit,
        exception_policy,
    })
}

/// The four-case value-parser wrapper (§4.2), extended to recurse through
/// literal YAML lists/maps so a fully-literal structure (no `${...}`
/// anywhere) still parses to the equivalent `Expr` tree.
fn yaml_to_expr(v: &Yaml) -> Result<Expr, ParseError> {
    Ok(match v {
        Yaml::Null => Expr::Null,
        Yaml::Bool(b) => Expr::Bool(*b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Expr::Int(i)
            } else {
                Expr::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Yaml::String(s) => parse_value_expr(s)?,
        Yaml::Sequence(seq) => {
            Expr::List(seq.iter().map(yaml_to_expr).collect::<Result<_, _>>()?)
        }
        Yaml::Mapping(m) => Expr::Map(
            m.iter()
                .map(|(k, v)| Ok((yaml_key_string(k), yaml_to_expr(v)?)))
                .collect::<Result<Vec<_>, ParseError>>()?,
        ),
        Yaml::Tagged(t) => yaml_to_expr(&t.value)?,
    })
}
