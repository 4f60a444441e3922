use super::{Expr, ExprField};

use indexmap::IndexMap;

/// Maps `(class alias, attribute code)` to a replacement expression.
///
/// Built by the compiler as physical tables get joined; applied with
/// [`Expr::translate`].
#[derive(Debug, Clone, Default)]
pub struct Translation {
    map: IndexMap<String, IndexMap<String, Expr>>,
}

impl Translation {
    pub fn insert(&mut self, alias: impl Into<String>, code: impl Into<String>, expr: Expr) {
        self.map
            .entry(alias.into())
            .or_default()
            .insert(code.into(), expr);
    }

    pub fn get(&self, alias: &str, code: &str) -> Option<&Expr> {
        self.map.get(alias)?.get(code)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Attribute codes still referenced as [`ExprField`], grouped by alias.
///
/// The compiler asks "which codes for alias X are not yet bound to a
/// physical column" between resolution passes.
#[derive(Debug, Clone, Default)]
pub struct UnresolvedFields {
    by_alias: IndexMap<String, IndexMap<String, ExprField>>,
}

impl UnresolvedFields {
    pub(super) fn record(&mut self, field: &ExprField) {
        self.by_alias
            .entry(field.alias.clone())
            .or_default()
            .entry(field.code.clone())
            .or_insert_with(|| field.clone());
    }

    pub fn for_alias(&self, alias: &str) -> Option<&IndexMap<String, ExprField>> {
        self.by_alias.get(alias)
    }

    pub fn contains(&self, alias: &str, code: &str) -> bool {
        self.by_alias
            .get(alias)
            .is_some_and(|codes| codes.contains_key(code))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.by_alias.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexMap<String, ExprField>)> {
        self.by_alias.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}
