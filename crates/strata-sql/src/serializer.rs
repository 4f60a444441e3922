#[macro_use]
mod fmt;
use fmt::{Ident, Qualified, ToSql};

mod args;
pub use args::Args;

mod delim;
use delim::Comma;

mod expr;
use expr::{Ordered, Selected};

use crate::{Join, JoinKind, JoinOn, SqlQuery};

use strata_core::driver::Escaper;
use strata_core::search::TreeOperator;
use strata_core::{Error, Expr, Result};

/// Renders a compiled query tree to SQL text for the single supported
/// backend.
pub struct Renderer<'a> {
    escaper: &'a dyn Escaper,
    args: &'a Args,
}

struct Formatter<'a> {
    escaper: &'a dyn Escaper,

    /// Named argument values looked up for `:name` placeholders
    args: &'a Args,

    /// Where to write the serialized SQL
    dst: &'a mut String,

    /// First placeholder with no argument value, reported after the pass
    missing: Option<String>,
}

impl<'a> Renderer<'a> {
    pub fn new(escaper: &'a dyn Escaper, args: &'a Args) -> Renderer<'a> {
        Renderer { escaper, args }
    }

    pub fn render_select(
        &self,
        query: &SqlQuery,
        order_by: &[(Expr, bool)],
        limit: Option<u64>,
        offset: Option<u64>,
        count_only: bool,
    ) -> Result<String> {
        self.render(query, |f| {
            fmt!(f, "SELECT ");
            if count_only {
                match &query.selected_id_column {
                    Some(id) => {
                        fmt!(f, "COUNT(DISTINCT " Qualified(&id.table_alias, &id.column) ") AS COUNT");
                    }
                    None => fmt!(f, "COUNT(*) AS COUNT"),
                }
            } else {
                fmt!(f, Comma(query.select.iter().map(|(name, expr)| Selected(name, expr))));
            }
            Self::render_from(f, query);
            Self::render_where(f, query);
            if !count_only {
                if !order_by.is_empty() {
                    fmt!(f, " ORDER BY " Comma(order_by.iter().map(|(e, asc)| Ordered(e, *asc))));
                }
                if let Some(limit) = limit {
                    let clause = format!(" LIMIT {limit}");
                    fmt!(f, clause.as_str());
                    if let Some(offset) = offset {
                        let clause = format!(" OFFSET {offset}");
                        fmt!(f, clause.as_str());
                    }
                }
            }
        })
    }

    /// Grouping: the group expressions double as the projection, plus the
    /// group size.
    pub fn render_group_by(&self, query: &SqlQuery) -> Result<String> {
        self.render(query, |f| {
            fmt!(f, "SELECT " Comma(query.group_by.iter().map(|(name, expr)| Selected(name, expr))));
            fmt!(f, ", COUNT(*) AS _count_");
            Self::render_from(f, query);
            Self::render_where(f, query);
            fmt!(f, " GROUP BY " Comma(query.group_by.values()));
        })
    }

    pub fn render_delete(&self, query: &SqlQuery) -> Result<String> {
        self.render(query, |f| {
            fmt!(f, "DELETE " Ident(&query.table_alias));
            Self::render_from(f, query);
            Self::render_where(f, query);
        })
    }

    pub fn render_update(&self, query: &SqlQuery) -> Result<String> {
        self.render(query, |f| {
            fmt!(f, "UPDATE " Ident(&query.table) " AS " Ident(&query.table_alias));
            Self::render_joins(f, &query.table_alias, &query.joins);
            let mut s = " SET ";
            for node in query.nodes() {
                for (column, value) in &node.update_values {
                    let quoted = f.escaper.quote(value);
                    fmt!(f, s Qualified(&node.table_alias, column) " = " quoted.as_str());
                    s = ", ";
                }
            }
            Self::render_where(f, query);
        })
    }

    fn render(&self, query: &SqlQuery, body: impl FnOnce(&mut Formatter<'_>)) -> Result<String> {
        let mut out = String::new();
        let mut f = Formatter {
            escaper: self.escaper,
            args: self.args,
            dst: &mut out,
            missing: None,
        };
        body(&mut f);
        match f.missing {
            Some(name) => {
                Err(Error::missing_argument(name).with_query_text(&query.source_canonical))
            }
            None => Ok(out),
        }
    }

    fn render_from(f: &mut Formatter<'_>, query: &SqlQuery) {
        fmt!(f, " FROM " Ident(&query.table) " AS " Ident(&query.table_alias));
        Self::render_joins(f, &query.table_alias, &query.joins);
    }

    fn render_joins(f: &mut Formatter<'_>, parent_alias: &str, joins: &[Join]) {
        for join in joins {
            let keyword = match join.kind {
                JoinKind::Inner | JoinKind::InnerTree(_) => " INNER JOIN ",
                JoinKind::Left => " LEFT JOIN ",
            };
            fmt!(f, keyword Ident(&join.query.table) " AS " Ident(&join.query.table_alias) " ON ");
            Self::render_on(f, parent_alias, join);
            Self::render_joins(f, &join.query.table_alias, &join.query.joins);
        }
    }

    fn render_on(f: &mut Formatter<'_>, parent_alias: &str, join: &Join) {
        match &join.on {
            JoinOn::Key {
                left_column,
                right_column,
                right_table_alias,
            } => {
                let right_alias = right_table_alias
                    .as_deref()
                    .unwrap_or(&join.query.table_alias);
                fmt!(f, Qualified(parent_alias, left_column) " = " Qualified(right_alias, right_column));
            }
            JoinOn::TreeRange {
                outer_alias,
                left_column,
                right_column,
            } => {
                let sub = &join.query.table_alias;
                let (left_op, right_op) = match join.kind {
                    JoinKind::InnerTree(TreeOperator::Below) => (" >= ", " <= "),
                    JoinKind::InnerTree(TreeOperator::BelowStrict) => (" > ", " < "),
                    JoinKind::InnerTree(TreeOperator::Above) => (" <= ", " >= "),
                    JoinKind::InnerTree(TreeOperator::AboveStrict) => (" < ", " > "),
                    _ => (" = ", " = "),
                };
                fmt!(f, Qualified(outer_alias, left_column) left_op Qualified(sub, left_column));
                fmt!(f, " AND " Qualified(outer_alias, right_column) right_op Qualified(sub, right_column));
            }
        }
    }

    fn render_where(f: &mut Formatter<'_>, query: &SqlQuery) {
        let mut s = " WHERE ";
        for node in query.nodes() {
            if let Some(condition) = &node.condition {
                if condition.is_true() {
                    continue;
                }
                fmt!(f, s condition);
                s = " AND ";
            }
        }
    }
}
