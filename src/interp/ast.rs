//! Expression trees for the command language.

use crate::interp::lexer::TokenKind;
use std::fmt;

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Dbl(f64),
    Bool(bool),
    Char(char),
    Str(String),
    List(Vec<Expr>),
    /// identifier; macro arguments keep their `$` prefix
    Var(String),
    Unary {
        op: TokenKind,
        op_str: String,
        expr: Box<Expr>,
    },
    Binary {
        op: TokenKind,
        op_str: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: TokenKind,
        op_str: String,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// n-ary chained comparison: operands.len() == ops.len() + 1
    Compare {
        operands: Vec<Expr>,
        ops: Vec<(TokenKind, String)>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        base: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Pipeline {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Dot {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Dbl(v) => write!(f, "{v}"),
            Expr::Bool(v) => write!(f, "{v}"),
            Expr::Char(c) => write!(f, "'{c}'"),
            Expr::Str(s) => write!(f, "\"{s}\""),
            Expr::List(xs) => {
                write!(f, "[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "]")
            }
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Unary { op_str, expr, .. } => write!(f, "{op_str}{expr}"),
            Expr::Binary {
                op_str, lhs, rhs, ..
            } => write!(f, "{lhs} {op_str} {rhs}"),
            Expr::Assign {
                op_str,
                target,
                value,
                ..
            } => write!(f, "{target} {op_str} {value}"),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => write!(f, "{cond} ? {then} : {otherwise}"),
            Expr::Compare { operands, ops } => {
                for (i, (_, op_str)) in ops.iter().enumerate() {
                    write!(f, "{} {op_str} ", operands[i])?;
                }
                write!(f, "{}", operands[operands.len() - 1])
            }
            Expr::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Index { base, index } => write!(f, "{base}[{index}]"),
            Expr::Slice { base, start, end } => {
                write!(f, "{base}[")?;
                if let Some(s) = start {
                    write!(f, "{s}")?;
                }
                write!(f, ":")?;
                if let Some(e) = end {
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            }
            Expr::Pipeline { lhs, rhs } => write!(f, "{lhs} |> {rhs}"),
            Expr::Dot { lhs, rhs } => write!(f, "{lhs}.{rhs}"),
        }
    }
}
