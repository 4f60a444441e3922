use super::Expr;

/// References a physical column of a table alias. Resolved: rendering this
/// node needs no further lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExprColumn {
    pub table_alias: String,
    pub column: String,
}

impl ExprColumn {
    pub fn new(table_alias: impl Into<String>, column: impl Into<String>) -> ExprColumn {
        ExprColumn {
            table_alias: table_alias.into(),
            column: column.into(),
        }
    }
}

impl Expr {
    pub fn column(table_alias: impl Into<String>, column: impl Into<String>) -> Expr {
        ExprColumn::new(table_alias, column).into()
    }
}

impl From<ExprColumn> for Expr {
    fn from(value: ExprColumn) -> Self {
        Self::Column(value)
    }
}
