use indexmap::IndexMap;
use strata_core::expr::ExprColumn;
use strata_core::search::TreeOperator;
use strata_core::{Expr, Value};

/// One single-table node of a compiled query, carrying the joins hanging
/// off it. The compiler produces a tree of these; the renderer flattens it
/// into SQL text. `Clone` gives the deep copy the cache hands out.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub table: String,
    pub table_alias: String,

    /// Projection: output name -> fully resolved expression. Populated on
    /// the root node only.
    pub select: IndexMap<String, Expr>,

    /// The id column of the queried class, counted by COUNT queries.
    pub selected_id_column: Option<ExprColumn>,

    /// SET assignments for UPDATE, against this node's table alias.
    pub update_values: IndexMap<String, Value>,

    /// Condition local to this node; the root carries the whole translated
    /// search condition.
    pub condition: Option<Expr>,

    pub joins: Vec<Join>,

    /// Grouping expressions, output name -> expression; they double as the
    /// projection of a GROUP BY query.
    pub group_by: IndexMap<String, Expr>,

    /// Canonical text of the source search, attached to argument errors.
    pub source_canonical: String,
}

impl SqlQuery {
    pub fn new(table: impl Into<String>, table_alias: impl Into<String>) -> SqlQuery {
        SqlQuery {
            table: table.into(),
            table_alias: table_alias.into(),
            select: IndexMap::new(),
            selected_id_column: None,
            update_values: IndexMap::new(),
            condition: None,
            joins: vec![],
            group_by: IndexMap::new(),
            source_canonical: String::new(),
        }
    }

    pub fn add_join(&mut self, kind: JoinKind, query: SqlQuery, on: JoinOn) {
        self.joins.push(Join { kind, query, on });
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn condition(&self) -> Option<&Expr> {
        self.condition.as_ref()
    }

    pub fn select(&self) -> &IndexMap<String, Expr> {
        &self.select
    }

    /// Every node of the tree, depth first, root included.
    pub fn nodes(&self) -> Vec<&SqlQuery> {
        let mut out = vec![self];
        for join in &self.joins {
            out.extend(join.query.nodes());
        }
        out
    }

    /// The node carrying the given table alias.
    pub fn node_mut(&mut self, table_alias: &str) -> Option<&mut SqlQuery> {
        if self.table_alias == table_alias {
            return Some(self);
        }
        self.joins
            .iter_mut()
            .find_map(|join| join.query.node_mut(table_alias))
    }
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub query: SqlQuery,
    pub on: JoinOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,

    /// Inner join over a nested-set range, for hierarchical operators.
    InnerTree(TreeOperator),
}

#[derive(Debug, Clone)]
pub enum JoinOn {
    /// `left.column = joined.column`
    Key {
        left_column: String,
        right_column: String,

        /// Alias carrying `right_column` inside the joined tree; defaults
        /// to the joined node's own alias.
        right_table_alias: Option<String>,
    },

    /// Nested-set range comparison between `outer_alias` and the joined
    /// node; both tables carry the same left/right column names since a
    /// hierarchical key is self-referencing.
    TreeRange {
        outer_alias: String,
        left_column: String,
        right_column: String,
    },
}
