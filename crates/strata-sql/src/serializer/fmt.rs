use super::Formatter;

macro_rules! fmt {
    ($f:expr, $( $fragments:expr )*) => {{
        $(
            $fragments.to_sql($f);
        )*
    }};
}

pub(super) trait ToSql {
    fn to_sql(self, f: &mut Formatter<'_>);
}

impl ToSql for &str {
    fn to_sql(self, f: &mut Formatter<'_>) {
        f.dst.push_str(self);
    }
}

impl ToSql for &String {
    fn to_sql(self, f: &mut Formatter<'_>) {
        f.dst.push_str(self);
    }
}

/// Backtick-quoted identifier.
pub(super) struct Ident<S>(pub(super) S);

impl<S: AsRef<str>> ToSql for Ident<S> {
    fn to_sql(self, f: &mut Formatter<'_>) {
        f.dst.push('`');
        f.dst.push_str(self.0.as_ref());
        f.dst.push('`');
    }
}

/// `` `alias`.`column` ``
pub(super) struct Qualified<A, C>(pub(super) A, pub(super) C);

impl<A: AsRef<str>, C: AsRef<str>> ToSql for Qualified<A, C> {
    fn to_sql(self, f: &mut Formatter<'_>) {
        fmt!(f, Ident(self.0) "." Ident(self.1));
    }
}
