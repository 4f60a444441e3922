use super::Expr;

/// A named bind placeholder (`:name` in canonical text).
///
/// The value is looked up at render time; a name with no supplied value
/// raises a missing-argument error carrying the query text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprArg {
    pub name: String,
}

impl ExprArg {
    pub fn new(name: impl Into<String>) -> ExprArg {
        ExprArg { name: name.into() }
    }
}

impl Expr {
    pub fn arg(name: impl Into<String>) -> Expr {
        ExprArg::new(name).into()
    }
}

impl From<ExprArg> for Expr {
    fn from(value: ExprArg) -> Self {
        Self::Arg(value)
    }
}
