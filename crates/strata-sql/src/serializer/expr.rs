use super::{Comma, Formatter, Ident, Qualified, ToSql};

use strata_core::Expr;

impl ToSql for &Expr {
    fn to_sql(self, f: &mut Formatter<'_>) {
        match self {
            Expr::And(expr) => {
                let mut s = "";
                for operand in &expr.operands {
                    fmt!(f, s operand);
                    s = " AND ";
                }
            }
            Expr::Or(expr) => {
                let mut s = "";
                for operand in &expr.operands {
                    fmt!(f, s operand);
                    s = " OR ";
                }
            }
            Expr::BinaryOp(expr) => {
                let op = expr.op.to_string();
                let lhs = &*expr.lhs;
                let rhs = &*expr.rhs;
                fmt!(f, "(" lhs " " op.as_str() " " rhs ")");
            }
            // unresolved fields render like columns; the compiler guarantees
            // none survive to rendering
            Expr::Field(expr) => {
                fmt!(f, Qualified(&expr.alias, &expr.code));
            }
            Expr::Column(expr) => {
                fmt!(f, Qualified(&expr.table_alias, &expr.column));
            }
            Expr::Value(value) => {
                let quoted = f.escaper.quote(value);
                fmt!(f, quoted.as_str());
            }
            Expr::Arg(expr) => match f.args.get(&expr.name) {
                Some(value) => {
                    let quoted = f.escaper.quote(value);
                    fmt!(f, quoted.as_str());
                }
                None => {
                    if f.missing.is_none() {
                        f.missing = Some(expr.name.clone());
                    }
                    let name = &expr.name;
                    fmt!(f, ":" name);
                }
            },
            Expr::Func(expr) => {
                fmt!(f, &expr.name "(" Comma(&expr.args) ")");
            }
            Expr::List(expr) => {
                fmt!(f, "(" Comma(&expr.items) ")");
            }
            Expr::ConcatWs(expr) => {
                let sep = format!("'{}'", f.escaper.escape(&expr.separator));
                fmt!(f, "CONCAT_WS(" sep.as_str() ", " Comma(&expr.operands) ")");
            }
        }
    }
}

/// Output column: `expr AS `name``
pub(super) struct Selected<'a>(pub(super) &'a str, pub(super) &'a Expr);

impl ToSql for Selected<'_> {
    fn to_sql(self, f: &mut Formatter<'_>) {
        fmt!(f, self.1 " AS " Ident(self.0));
    }
}

/// One ORDER BY entry: `expr ASC|DESC`
pub(super) struct Ordered<'a>(pub(super) &'a Expr, pub(super) bool);

impl ToSql for Ordered<'_> {
    fn to_sql(self, f: &mut Formatter<'_>) {
        let direction = if self.1 { " ASC" } else { " DESC" };
        fmt!(f, self.0 direction);
    }
}
