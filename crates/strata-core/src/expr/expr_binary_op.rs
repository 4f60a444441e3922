use super::{Expr, ExprList};

use std::fmt;

/// A binary comparison between two expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprBinaryOp {
    pub lhs: Box<Expr>,
    pub op: CompareOp,
    pub rhs: Box<Expr>,
}

/// The comparison operators the filter definitions allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    In,
    NotIn,
}

impl Expr {
    pub fn binary_op(lhs: impl Into<Self>, op: CompareOp, rhs: impl Into<Self>) -> Self {
        ExprBinaryOp {
            lhs: Box::new(lhs.into()),
            op,
            rhs: Box::new(rhs.into()),
        }
        .into()
    }

    pub fn eq(lhs: impl Into<Self>, rhs: impl Into<Self>) -> Self {
        Expr::binary_op(lhs, CompareOp::Eq, rhs)
    }

    pub fn ne(lhs: impl Into<Self>, rhs: impl Into<Self>) -> Self {
        Expr::binary_op(lhs, CompareOp::Ne, rhs)
    }

    pub fn gt(lhs: impl Into<Self>, rhs: impl Into<Self>) -> Self {
        Expr::binary_op(lhs, CompareOp::Gt, rhs)
    }

    pub fn lt(lhs: impl Into<Self>, rhs: impl Into<Self>) -> Self {
        Expr::binary_op(lhs, CompareOp::Lt, rhs)
    }

    pub fn like(lhs: impl Into<Self>, pattern: impl Into<Self>) -> Self {
        Expr::binary_op(lhs, CompareOp::Like, pattern)
    }

    /// `lhs IN (items)`; an empty list collapses to the always-false
    /// condition, which is what an empty id set means.
    pub fn in_list(lhs: impl Into<Self>, items: Vec<Expr>) -> Self {
        if items.is_empty() {
            return Expr::always_false();
        }
        Expr::binary_op(lhs, CompareOp::In, ExprList { items })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Like => "LIKE",
            CompareOp::NotLike => "NOT LIKE",
            CompareOp::In => "IN",
            CompareOp::NotIn => "NOT IN",
        })
    }
}

impl From<ExprBinaryOp> for Expr {
    fn from(value: ExprBinaryOp) -> Self {
        Self::BinaryOp(value)
    }
}
