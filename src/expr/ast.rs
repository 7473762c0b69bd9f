//! Expression AST (§3).

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    FloorDiv,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
}

/// A segment of a dotted/indexed call name, e.g. `http.get` or `a.b.c`.
pub type DottedName = Vec<String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Ident(String),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Property(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(DottedName, Vec<Expr>),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    /// `in` / `not in`.
    Membership {
        needle: Box<Expr>,
        haystack: Box<Expr>,
        negated: bool,
    },
    /// String interpolation: alternating literal and expression parts.
    Interpolation(Vec<InterpPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterpPart {
    Literal(String),
    Expr(Expr),
}
