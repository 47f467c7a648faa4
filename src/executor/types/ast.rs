//! Abstract Syntax Tree node types
//!
//! Scripts reach the engine already parsed, as a `"t"`-tagged tree.

use serde::{Deserialize, Serialize};

/// A complete workflow script: named routines plus the top-level body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
    pub body: Stmt,
}

/// A named routine declared by the script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Stmt,
    /// Must run to completion without ever suspending (the `@NonCPS` marker)
    #[serde(default)]
    pub non_resumable: bool,
}

/// One branch of a `parallel` fork
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub body: Stmt,
}

/// Statement AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Block {
        body: Vec<Stmt>,
    },
    Declare {
        name: String,
        #[serde(default)]
        init: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    If {
        test: Expr,
        then_s: Box<Stmt>,
        #[serde(default)]
        else_s: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    ForOf {
        binding: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Throw {
        value: Expr,
    },
    Try {
        body: Box<Stmt>,
        catch_var: String,
        catch_body: Box<Stmt>,
    },
    Expr {
        expr: Expr,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And, // &&
    Or,  // ||
}

/// Expression AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    LitNull,
    LitBool {
        v: bool,
    },
    LitNum {
        v: f64,
    },
    LitStr {
        v: String,
    },
    LitList {
        elements: Vec<Expr>,
    },
    LitObj {
        properties: Vec<(String, Expr)>,
    },
    Ident {
        name: String,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// String interpolation; a part that evaluates to a closure is rendered lazily
    Interpolate {
        parts: Vec<Expr>,
    },
    /// Closure literal. A body consisting of a single `Expr` statement yields its value.
    Lambda {
        #[serde(default)]
        params: Vec<String>,
        body: Box<Stmt>,
    },
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Parallel {
        branches: Vec<Branch>,
    },
}
