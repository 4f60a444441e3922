use crate::Value;

/// One physical column backing an attribute. Multi-column attributes give
/// each column a suffix appended to the attribute code in projections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlColumn {
    pub suffix: String,
    pub column: String,
}

impl SqlColumn {
    pub fn new(suffix: impl Into<String>, column: impl Into<String>) -> SqlColumn {
        SqlColumn {
            suffix: suffix.into(),
            column: column.into(),
        }
    }
}

/// An attribute descriptor.
///
/// The owning class of an attribute is the class that introduced it;
/// subclasses hold clones whose origin (tracked on the class) still points
/// at the introducing class.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub code: String,
    pub kind: AttributeKind,
    pub null_allowed: bool,
    pub default: Value,

    /// Enumerated scalars list their allowed values; the integrity checker
    /// flags anything else.
    pub allowed_values: Option<Vec<String>>,

    /// Set on the discriminator clones injected into subclasses: the
    /// concrete class name the column must hold.
    pub fixed_value: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AttributeKind {
    /// A plain scalar over one or more physical columns.
    Scalar { columns: Vec<SqlColumn> },

    /// References another class's identity column. `null_allowed` on the
    /// attribute decides inner vs left join.
    ExternalKey { target_class: String, column: String },

    /// A self-referencing parent key carrying a nested-set (left, right)
    /// column pair.
    HierarchicalKey {
        column: String,
        left_column: String,
        right_column: String,
    },

    /// A value copied through an external key from the target class.
    ExternalField { key_attr: String, target_attr: String },

    /// The computed human-readable label. `key_attr == "id"` labels the
    /// object itself; otherwise the object behind that external key.
    FriendlyName { key_attr: String },

    /// A set of objects of `linked_class` pointing back at me. No column
    /// of its own.
    LinkSet {
        linked_class: String,
        ext_key_to_me: String,
    },

    /// The injected discriminator: stores the concrete leaf class in the
    /// root's table.
    FinalClass { column: String },
}

impl Attribute {
    fn new(code: impl Into<String>, kind: AttributeKind) -> Attribute {
        Attribute {
            code: code.into(),
            kind,
            null_allowed: false,
            default: Value::Null,
            allowed_values: None,
            fixed_value: None,
        }
    }

    pub fn scalar(code: impl Into<String>, column: impl Into<String>) -> Attribute {
        Attribute::new(
            code,
            AttributeKind::Scalar {
                columns: vec![SqlColumn::new("", column)],
            },
        )
    }

    pub fn scalar_multi(code: impl Into<String>, columns: Vec<SqlColumn>) -> Attribute {
        Attribute::new(code, AttributeKind::Scalar { columns })
    }

    pub fn external_key(
        code: impl Into<String>,
        column: impl Into<String>,
        target_class: impl Into<String>,
    ) -> Attribute {
        Attribute::new(
            code,
            AttributeKind::ExternalKey {
                target_class: target_class.into(),
                column: column.into(),
            },
        )
    }

    pub fn hierarchical_key(
        code: impl Into<String>,
        column: impl Into<String>,
        left_column: impl Into<String>,
        right_column: impl Into<String>,
    ) -> Attribute {
        Attribute::new(
            code,
            AttributeKind::HierarchicalKey {
                column: column.into(),
                left_column: left_column.into(),
                right_column: right_column.into(),
            },
        )
        .allow_null(true)
    }

    pub fn external_field(
        code: impl Into<String>,
        key_attr: impl Into<String>,
        target_attr: impl Into<String>,
    ) -> Attribute {
        Attribute::new(
            code,
            AttributeKind::ExternalField {
                key_attr: key_attr.into(),
                target_attr: target_attr.into(),
            },
        )
        .allow_null(true)
    }

    pub fn friendly_name(code: impl Into<String>, key_attr: impl Into<String>) -> Attribute {
        Attribute::new(
            code,
            AttributeKind::FriendlyName {
                key_attr: key_attr.into(),
            },
        )
        .allow_null(true)
    }

    pub fn link_set(
        code: impl Into<String>,
        linked_class: impl Into<String>,
        ext_key_to_me: impl Into<String>,
    ) -> Attribute {
        Attribute::new(
            code,
            AttributeKind::LinkSet {
                linked_class: linked_class.into(),
                ext_key_to_me: ext_key_to_me.into(),
            },
        )
    }

    pub(super) fn final_class(code: impl Into<String>, column: impl Into<String>) -> Attribute {
        Attribute::new(code, AttributeKind::FinalClass { column: column.into() })
    }

    pub fn allow_null(mut self, null_allowed: bool) -> Self {
        self.null_allowed = null_allowed;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    pub fn with_allowed_values<S: Into<String>>(
        mut self,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub(super) fn with_fixed_value(mut self, value: impl Into<String>) -> Self {
        self.fixed_value = Some(value.into());
        self
    }

    /// Scalar in the projection sense: everything that yields a value per
    /// row. Only link sets are excluded.
    pub fn is_scalar(&self) -> bool {
        !matches!(self.kind, AttributeKind::LinkSet { .. })
    }

    pub fn is_external_key(&self) -> bool {
        matches!(
            self.kind,
            AttributeKind::ExternalKey { .. } | AttributeKind::HierarchicalKey { .. }
        )
    }

    pub fn is_hierarchical_key(&self) -> bool {
        matches!(self.kind, AttributeKind::HierarchicalKey { .. })
    }

    pub fn is_external_field(&self) -> bool {
        matches!(self.kind, AttributeKind::ExternalField { .. })
    }

    pub fn is_friendly_name(&self) -> bool {
        matches!(self.kind, AttributeKind::FriendlyName { .. })
    }

    pub fn is_final_class(&self) -> bool {
        matches!(self.kind, AttributeKind::FinalClass { .. })
    }

    /// A direct field maps straight to columns of the introducing class's
    /// table: writable through an UPDATE.
    pub fn is_direct(&self) -> bool {
        matches!(
            self.kind,
            AttributeKind::Scalar { .. }
                | AttributeKind::ExternalKey { .. }
                | AttributeKind::HierarchicalKey { .. }
                | AttributeKind::FinalClass { .. }
        )
    }

    /// The external-key target: the referenced class for a plain key, the
    /// host class itself for a hierarchical key (resolved by the caller).
    pub fn target_class(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::ExternalKey { target_class, .. } => Some(target_class),
            _ => None,
        }
    }

    /// The external key an external field or friendly name rides on.
    pub fn key_attr(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::ExternalField { key_attr, .. } => Some(key_attr),
            AttributeKind::FriendlyName { key_attr } => Some(key_attr),
            _ => None,
        }
    }

    pub fn target_attr(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::ExternalField { target_attr, .. } => Some(target_attr),
            _ => None,
        }
    }

    /// The physical columns this attribute owns on the introducing class's
    /// table, suffix first. Computed and copied attributes own none.
    pub fn sql_columns(&self) -> Vec<SqlColumn> {
        match &self.kind {
            AttributeKind::Scalar { columns } => columns.clone(),
            AttributeKind::ExternalKey { column, .. } => vec![SqlColumn::new("", column)],
            AttributeKind::HierarchicalKey {
                column,
                left_column,
                right_column,
            } => vec![
                SqlColumn::new("", column),
                SqlColumn::new("_left", left_column),
                SqlColumn::new("_right", right_column),
            ],
            AttributeKind::FinalClass { column } => vec![SqlColumn::new("", column)],
            AttributeKind::ExternalField { .. }
            | AttributeKind::FriendlyName { .. }
            | AttributeKind::LinkSet { .. } => vec![],
        }
    }

    /// The first physical column, which is the join column for keys.
    pub fn first_column(&self) -> Option<String> {
        self.sql_columns().into_iter().next().map(|c| c.column)
    }
}
