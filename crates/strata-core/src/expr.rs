mod expr_and;
pub use expr_and::ExprAnd;

mod expr_arg;
pub use expr_arg::ExprArg;

mod expr_binary_op;
pub use expr_binary_op::{CompareOp, ExprBinaryOp};

mod expr_column;
pub use expr_column::ExprColumn;

mod expr_concat_ws;
pub use expr_concat_ws::ExprConcatWs;

mod expr_field;
pub use expr_field::ExprField;

mod expr_func;
pub use expr_func::ExprFunc;

mod expr_list;
pub use expr_list::ExprList;

mod expr_or;
pub use expr_or::ExprOr;

mod translation;
pub use translation::{Translation, UnresolvedFields};

use crate::Value;

/// A condition/projection expression over class aliases.
///
/// Expressions start out referencing attributes through [`ExprField`]
/// (alias + attribute code) and are progressively rewritten by the compiler
/// into [`ExprColumn`] references (table alias + physical column) via
/// [`Expr::translate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// AND a set of expressions
    And(ExprAnd),

    /// OR a set of expressions
    Or(ExprOr),

    /// Binary comparison
    BinaryOp(ExprBinaryOp),

    /// References an attribute of a class alias; unresolved until the
    /// compiler binds it to a physical column
    Field(ExprField),

    /// References a physical column of a table alias; resolved
    Column(ExprColumn),

    /// A constant value
    Value(Value),

    /// A named bind placeholder, supplied at render time
    Arg(ExprArg),

    /// An uninterpreted function call (IF, ISNULL, COALESCE, ...)
    Func(ExprFunc),

    /// A list of expressions, as the right-hand side of IN
    List(ExprList),

    /// String concatenation with a separator
    ConcatWs(ExprConcatWs),
}

impl Expr {
    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Value(value.into())
    }

    /// The always-true condition: the neutral element of `Expr::and`.
    pub fn always_true() -> Self {
        Expr::Value(Value::Bool(true))
    }

    /// The always-false condition, used to compile deny-all restrictions
    /// and empty id sets.
    pub fn always_false() -> Self {
        Expr::Value(Value::Bool(false))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Value(Value::Bool(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Value(Value::Bool(false)))
    }

    /// Canonical text form. Stable across processes, used as the cache
    /// signature component and in diagnostics.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) {
        use std::fmt::Write;

        match self {
            Expr::And(expr) => render_delimited(out, &expr.operands, " AND "),
            Expr::Or(expr) => render_delimited(out, &expr.operands, " OR "),
            Expr::BinaryOp(expr) => {
                out.push('(');
                expr.lhs.render_into(out);
                write!(out, " {} ", expr.op).unwrap();
                expr.rhs.render_into(out);
                out.push(')');
            }
            Expr::Field(expr) => {
                write!(out, "`{}`.`{}`", expr.alias, expr.code).unwrap();
            }
            Expr::Column(expr) => {
                write!(out, "`{}`.`{}`", expr.table_alias, expr.column).unwrap();
            }
            Expr::Value(value) => out.push_str(&value.to_string()),
            Expr::Arg(expr) => {
                write!(out, ":{}", expr.name).unwrap();
            }
            Expr::Func(expr) => {
                out.push_str(&expr.name);
                out.push('(');
                render_delimited(out, &expr.args, ", ");
                out.push(')');
            }
            Expr::List(expr) => {
                out.push('(');
                render_delimited(out, &expr.items, ", ");
                out.push(')');
            }
            Expr::ConcatWs(expr) => {
                write!(out, "CONCAT_WS('{}', ", expr.separator).unwrap();
                render_delimited(out, &expr.operands, ", ");
                out.push(')');
            }
        }
    }

    /// Rewrites every matching [`ExprField`] according to `translation`.
    ///
    /// The whole tree is rebuilt in a single pass: either the returned
    /// expression reflects the complete substitution or the original is
    /// left untouched, there is no partially-translated state observable.
    /// Fields with no entry in the table are kept as-is (they are resolved
    /// by a later pass against another table of the join).
    pub fn translate(&self, translation: &Translation) -> Expr {
        match self {
            Expr::Field(field) => match translation.get(&field.alias, &field.code) {
                Some(replacement) => replacement.clone(),
                None => self.clone(),
            },
            Expr::And(expr) => ExprAnd {
                operands: expr.operands.iter().map(|e| e.translate(translation)).collect(),
            }
            .into(),
            Expr::Or(expr) => ExprOr {
                operands: expr.operands.iter().map(|e| e.translate(translation)).collect(),
            }
            .into(),
            Expr::BinaryOp(expr) => ExprBinaryOp {
                lhs: Box::new(expr.lhs.translate(translation)),
                op: expr.op,
                rhs: Box::new(expr.rhs.translate(translation)),
            }
            .into(),
            Expr::Func(expr) => ExprFunc {
                name: expr.name.clone(),
                args: expr.args.iter().map(|e| e.translate(translation)).collect(),
            }
            .into(),
            Expr::List(expr) => ExprList {
                items: expr.items.iter().map(|e| e.translate(translation)).collect(),
            }
            .into(),
            Expr::ConcatWs(expr) => ExprConcatWs {
                separator: expr.separator.clone(),
                operands: expr.operands.iter().map(|e| e.translate(translation)).collect(),
            }
            .into(),
            Expr::Column(_) | Expr::Value(_) | Expr::Arg(_) => self.clone(),
        }
    }

    /// Rewrites every [`ExprField`] under the old class alias to the new
    /// one. Used when a joined sub-query's alias is renamed to keep the
    /// aggregate alias map unique.
    pub fn rename_alias(&self, old: &str, new: &str) -> Expr {
        match self {
            Expr::Field(field) if field.alias == old => {
                Expr::field(new, field.code.as_str())
            }
            Expr::Field(_) | Expr::Column(_) | Expr::Value(_) | Expr::Arg(_) => self.clone(),
            Expr::And(expr) => ExprAnd {
                operands: expr.operands.iter().map(|e| e.rename_alias(old, new)).collect(),
            }
            .into(),
            Expr::Or(expr) => ExprOr {
                operands: expr.operands.iter().map(|e| e.rename_alias(old, new)).collect(),
            }
            .into(),
            Expr::BinaryOp(expr) => ExprBinaryOp {
                lhs: Box::new(expr.lhs.rename_alias(old, new)),
                op: expr.op,
                rhs: Box::new(expr.rhs.rename_alias(old, new)),
            }
            .into(),
            Expr::Func(expr) => ExprFunc {
                name: expr.name.clone(),
                args: expr.args.iter().map(|e| e.rename_alias(old, new)).collect(),
            }
            .into(),
            Expr::List(expr) => ExprList {
                items: expr.items.iter().map(|e| e.rename_alias(old, new)).collect(),
            }
            .into(),
            Expr::ConcatWs(expr) => ExprConcatWs {
                separator: expr.separator.clone(),
                operands: expr.operands.iter().map(|e| e.rename_alias(old, new)).collect(),
            }
            .into(),
        }
    }

    /// Collects the attribute codes still referenced as [`ExprField`],
    /// grouped by class alias. The structural answer drives the compiler's
    /// iterative resolution.
    pub fn unresolved_fields(&self, out: &mut UnresolvedFields) {
        self.each_field(&mut |field| out.record(field));
    }

    fn each_field(&self, f: &mut impl FnMut(&ExprField)) {
        match self {
            Expr::Field(field) => f(field),
            Expr::And(expr) => expr.operands.iter().for_each(|e| e.each_field(f)),
            Expr::Or(expr) => expr.operands.iter().for_each(|e| e.each_field(f)),
            Expr::BinaryOp(expr) => {
                expr.lhs.each_field(f);
                expr.rhs.each_field(f);
            }
            Expr::Func(expr) => expr.args.iter().for_each(|e| e.each_field(f)),
            Expr::List(expr) => expr.items.iter().for_each(|e| e.each_field(f)),
            Expr::ConcatWs(expr) => expr.operands.iter().for_each(|e| e.each_field(f)),
            Expr::Column(_) | Expr::Value(_) | Expr::Arg(_) => {}
        }
    }

    /// Visits every named bind placeholder in the tree.
    pub fn each_arg(&self, f: &mut impl FnMut(&ExprArg)) {
        match self {
            Expr::Arg(arg) => f(arg),
            Expr::And(expr) => expr.operands.iter().for_each(|e| e.each_arg(f)),
            Expr::Or(expr) => expr.operands.iter().for_each(|e| e.each_arg(f)),
            Expr::BinaryOp(expr) => {
                expr.lhs.each_arg(f);
                expr.rhs.each_arg(f);
            }
            Expr::Func(expr) => expr.args.iter().for_each(|e| e.each_arg(f)),
            Expr::List(expr) => expr.items.iter().for_each(|e| e.each_arg(f)),
            Expr::ConcatWs(expr) => expr.operands.iter().for_each(|e| e.each_arg(f)),
            Expr::Column(_) | Expr::Value(_) | Expr::Field(_) => {}
        }
    }
}

fn render_delimited(out: &mut String, exprs: &[Expr], sep: &str) {
    let mut first = true;
    for expr in exprs {
        if !first {
            out.push_str(sep);
        }
        expr.render_into(out);
        first = false;
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Value(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Value(value.into())
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Value(value.into())
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Value(value.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_binary_condition() {
        let expr = Expr::eq(Expr::field("t", "status"), Expr::value("open"));
        assert_eq!(expr.render(), "(`t`.`status` = 'open')");
    }

    #[test]
    fn and_flattens_and_drops_true() {
        let expr = Expr::and(
            Expr::always_true(),
            Expr::and(Expr::field("t", "a"), Expr::field("t", "b")),
        );
        let Expr::And(and) = &expr else {
            panic!("expected an AND, got {expr:?}")
        };
        assert_eq!(and.operands.len(), 2);
    }

    #[test]
    fn translate_replaces_every_occurrence() {
        let expr = Expr::and(
            Expr::eq(Expr::field("t", "status"), Expr::value("open")),
            Expr::eq(Expr::field("t", "status"), Expr::field("t", "other")),
        );
        let mut translation = Translation::default();
        translation.insert("t", "status", Expr::Column(ExprColumn::new("tbl1", "status")));

        let translated = expr.translate(&translation);

        let mut unresolved = UnresolvedFields::default();
        translated.unresolved_fields(&mut unresolved);
        let remaining = unresolved.for_alias("t").unwrap();
        assert_eq!(remaining.keys().collect::<Vec<_>>(), ["other"]);
        // the source tree is untouched
        let mut original = UnresolvedFields::default();
        expr.unresolved_fields(&mut original);
        assert_eq!(original.for_alias("t").unwrap().len(), 2);
    }

    #[test]
    fn render_arg_placeholder() {
        let expr = Expr::eq(Expr::field("p", "id"), Expr::Arg(ExprArg::new("contact_id")));
        assert_eq!(expr.render(), "(`p`.`id` = :contact_id)");
    }
}
