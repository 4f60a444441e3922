use super::Expr;

/// String concatenation with a separator.
///
/// Friendly-name expressions use an empty separator; the full-text search
/// haystack concatenates every plain scalar column with a space.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprConcatWs {
    pub separator: String,
    pub operands: Vec<Expr>,
}

impl Expr {
    pub fn concat(operands: Vec<Expr>) -> Expr {
        if operands.len() == 1 {
            return operands.into_iter().next().unwrap();
        }
        ExprConcatWs {
            separator: String::new(),
            operands,
        }
        .into()
    }

    pub fn concat_ws(separator: impl Into<String>, operands: Vec<Expr>) -> Expr {
        ExprConcatWs {
            separator: separator.into(),
            operands,
        }
        .into()
    }
}

impl From<ExprConcatWs> for Expr {
    fn from(value: ExprConcatWs) -> Self {
        Self::ConcatWs(value)
    }
}
