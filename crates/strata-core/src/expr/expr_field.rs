use super::Expr;

/// References an attribute of a class alias.
///
/// Unresolved: the compiler rewrites fields into [`super::ExprColumn`]
/// references once the owning physical table of the attribute is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprField {
    /// The class alias the attribute belongs to
    pub alias: String,

    /// The attribute code
    pub code: String,
}

impl ExprField {
    pub fn new(alias: impl Into<String>, code: impl Into<String>) -> ExprField {
        ExprField {
            alias: alias.into(),
            code: code.into(),
        }
    }
}

impl Expr {
    pub fn field(alias: impl Into<String>, code: impl Into<String>) -> Expr {
        ExprField::new(alias, code).into()
    }
}

impl From<ExprField> for Expr {
    fn from(value: ExprField) -> Self {
        Self::Field(value)
    }
}
