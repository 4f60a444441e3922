use crate::{search::ModifierProperties, Result, Search, Value};

use indexmap::IndexMap;

/// Blocking interface to the external SQL store.
///
/// The compiler treats the store as opaque: issue a statement, wait, read
/// rows. Cancellation, timeouts and retries belong to the implementation.
pub trait Connection: Escaper {
    /// Executes a statement, returning rows for a query and the affected
    /// row count for a write.
    fn execute(&mut self, sql: &str) -> Result<ExecuteResult>;

    fn last_insert_id(&mut self) -> Result<i64>;

    fn table_exists(&mut self, table: &str) -> Result<bool>;

    fn column_info(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;

    fn index_info(&mut self, table: &str) -> Result<Vec<IndexInfo>>;
}

/// String-literal escaping, split out so the renderer can hold a cheap
/// handle without borrowing a whole connection mutably.
pub trait Escaper {
    fn escape(&self, value: &str) -> String;

    fn quote(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            Value::I64(v) => v.to_string(),
            Value::String(v) => format!("'{}'", self.escape(v)),
        }
    }
}

/// Escaping for the single supported backend: doubled single quotes and
/// doubled backslashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEscaper;

impl Escaper for StdEscaper {
    fn escape(&self, value: &str) -> String {
        value.replace('\\', "\\\\").replace('\'', "''")
    }
}

#[derive(Debug, Clone)]
pub enum ExecuteResult {
    Rows(Rowset),
    Affected(u64),
}

impl ExecuteResult {
    pub fn into_rows(self) -> Result<Rowset> {
        match self {
            ExecuteResult::Rows(rows) => Ok(rows),
            ExecuteResult::Affected(_) => Err(crate::err!("expected a rowset, got a row count")),
        }
    }
}

pub type Rowset = Vec<Row>;

/// One fetched row; column lookup is by name.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: IndexMap<String, Value>,
}

impl Row {
    pub fn new(columns: impl IntoIterator<Item = (String, Value)>) -> Row {
        Row {
            columns: columns.into_iter().collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.columns.get(column).and_then(Value::as_i64)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: String,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
}

/// Visibility restriction supplied by the access-control collaborator.
#[derive(Debug, Clone)]
pub enum VisibilityFilter {
    /// No additional restriction.
    Unrestricted,

    /// Nothing is visible; compiles to an always-false condition.
    DenyAll,

    /// AND-merged into the compiled search.
    Restrict(Search),
}

/// Access-control collaborator. The compiler knows nothing about rights;
/// it only splices the returned restriction into the query.
pub trait Visibility {
    fn select_filter(&self, class: &str, props: &ModifierProperties) -> VisibilityFilter;
}

/// Relation-traversal collaborator used by `related_to` criteria: computes
/// the closure of objects reachable through a named relation.
pub trait RelationGraph {
    /// Ids of the objects related to the result set of `start`, following
    /// `relation` up to `max_depth` hops, grouped by root class.
    fn related_object_ids(
        &self,
        start: &Search,
        relation: &str,
        max_depth: u32,
    ) -> Result<IndexMap<String, Vec<i64>>>;
}
