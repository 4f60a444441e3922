use indexmap::IndexMap;

/// One ORDER BY entry: an attribute code of the queried class, `id`
/// allowed as the synthetic key.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub code: String,
    pub ascending: bool,
}

impl OrderSpec {
    pub fn asc(code: impl Into<String>) -> OrderSpec {
        OrderSpec {
            code: code.into(),
            ascending: true,
        }
    }

    pub fn desc(code: impl Into<String>) -> OrderSpec {
        OrderSpec {
            code: code.into(),
            ascending: false,
        }
    }
}

/// An extra caller-owned table left-joined on the root id, for data
/// synchronization consumers.
#[derive(Debug, Clone)]
pub struct ExtendedJoinSpec {
    pub table: String,
    pub join_key_column: String,
}

#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub order_by: Vec<OrderSpec>,

    /// Attribute codes to project per class alias; None loads every
    /// scalar attribute of the queried class.
    pub columns_to_load: Option<IndexMap<String, Vec<String>>>,

    pub extended_join: Option<ExtendedJoinSpec>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub count_only: bool,
}
