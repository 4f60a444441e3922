use super::Expr;

/// An uninterpreted function call, rendered as `NAME(arg, ...)`.
///
/// The compiler emits IF (friendly-name branch selection), ISNULL
/// (group-by null exclusion) and COALESCE; nothing here checks the name
/// against the backend's function set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprFunc {
    pub name: String,
    pub args: Vec<Expr>,
}

impl Expr {
    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        ExprFunc {
            name: name.into(),
            args,
        }
        .into()
    }

    /// `IF(cond, then, else)`
    pub fn if_expr(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::func("IF", vec![cond, then, otherwise])
    }
}

impl From<ExprFunc> for Expr {
    fn from(value: ExprFunc) -> Self {
        Self::Func(value)
    }
}
