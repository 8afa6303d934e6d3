//! The executable form of a compiled score.
//!
//! A [`Song`] holds the rendered listing and a [`Program`]: a table of
//! procedures, each a flat instruction list with explicit jumps. Procedure 0
//! is the root track.

use std::collections::HashMap;
use std::fmt;

use crate::walker::state::{FieldRef, TrackField};

/// Host-language expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Undefined,
    Bool(bool),
    Number(f64),
    Str(String),
    Var(String),
    Member(Box<Expr>, String),
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Whether this expression calls the named function anywhere inside it.
    pub fn calls(&self, function: &str) -> bool {
        match self {
            Expr::Call { name, args } => name == function || args.iter().any(|a| a.calls(function)),
            Expr::Member(object, _) => object.calls(function),
            Expr::List(items) => items.iter().any(|i| i.calls(function)),
            Expr::Object(entries) => entries.iter().any(|(_, v)| v.calls(function)),
            Expr::Unary(_, operand) => operand.calls(function),
            Expr::Binary(_, left, right) => left.calls(function) || right.calls(function),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Something a host statement can assign to.
#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Var(String),
    Track(FieldRef),
}

impl Place {
    /// The place an expression denotes, if it denotes one.
    pub fn from_expr(expr: &Expr) -> Option<Place> {
        match expr {
            Expr::Var(name) if name != "track" => Some(Place::Var(name.clone())),
            Expr::Member(object, field) if matches!(object.as_ref(), Expr::Var(v) if v == "track") => {
                Some(Place::Track(FieldRef::from_name(field)))
            }
            _ => None,
        }
    }
}

/// Compound assignment operator; `Set` is plain `=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostStmt {
    Declare { name: String, value: Expr },
    Assign { place: Place, op: AssignOp, value: Expr },
    Eval(Expr),
}

impl HostStmt {
    pub fn calls(&self, function: &str) -> bool {
        match self {
            HostStmt::Declare { value, .. } | HostStmt::Assign { value, .. } => value.calls(function),
            HostStmt::Eval(expr) => expr.calls(function),
        }
    }
}

/// Where an awaited call stores the finished child's state.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub declare: bool,
    pub place: Place,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Build the track state from the call context and bind parameters.
    EnterTrack,
    Execute {
        command: String,
        overrides: Vec<(TrackField, Expr)>,
    },
    /// Advance the track. A guarded wait returns from the procedure once the
    /// track duration is reached.
    Wait { duration: Expr, guarded: bool },
    Call {
        target: String,
        overrides: Vec<(FieldRef, Expr)>,
        args: Vec<Expr>,
        awaited: bool,
        binding: Option<Binding>,
    },
    Host(HostStmt),
    JumpUnless { cond: Expr, target: usize },
    Jump(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub procedures: Vec<Procedure>,
    index: HashMap<String, usize>,
}

pub const ROOT_PROCEDURE: usize = 0;

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// A program with an empty root procedure.
    pub fn new() -> Self {
        Self {
            procedures: vec![Procedure {
                name: "rootTrack".to_string(),
                params: Vec::new(),
                body: Vec::new(),
            }],
            index: HashMap::new(),
        }
    }

    /// Register a named track procedure. Returns `None` if the name is taken.
    pub fn define(&mut self, name: &str, params: Vec<String>) -> Option<usize> {
        if self.index.contains_key(name) {
            return None;
        }
        let idx = self.procedures.len();
        self.procedures.push(Procedure {
            name: name.to_string(),
            params,
            body: vec![Instr::EnterTrack],
        });
        self.index.insert(name.to_string(), idx);
        Some(idx)
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn root(&self) -> &Procedure {
        &self.procedures[ROOT_PROCEDURE]
    }

    pub fn track_names(&self) -> impl Iterator<Item = &str> {
        self.procedures.iter().skip(1).map(|p| p.name.as_str())
    }
}

/// A compiled score.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// The generated procedural source, wrapped in the root template.
    pub listing: String,
    pub program: Program,
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.listing)
    }
}
