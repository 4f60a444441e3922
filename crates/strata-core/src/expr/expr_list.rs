use super::Expr;

use crate::Value;

/// A parenthesized list of expressions, the right-hand side of IN.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprList {
    pub items: Vec<Expr>,
}

impl ExprList {
    pub fn from_strings<S: Into<String>>(items: impl IntoIterator<Item = S>) -> ExprList {
        ExprList {
            items: items
                .into_iter()
                .map(|s| Expr::Value(Value::String(s.into())))
                .collect(),
        }
    }
}

impl From<ExprList> for Expr {
    fn from(value: ExprList) -> Self {
        Self::List(value)
    }
}
