use super::{Attribute, FilterDef};

use indexmap::{IndexMap, IndexSet};

/// How a class's identity column is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyKind {
    #[default]
    AutoIncrement,
    Text,
}

/// The friendly-name recipe of a class: a format string with `%N$s`
/// placeholders and the attribute codes feeding them.
#[derive(Debug, Clone, PartialEq)]
pub struct NameSpec {
    pub format: String,
    pub attributes: Vec<String>,
}

impl NameSpec {
    /// One attribute, used verbatim as the name.
    pub fn attribute(code: impl Into<String>) -> NameSpec {
        NameSpec {
            format: "%1$s".to_string(),
            attributes: vec![code.into()],
        }
    }

    /// Several attributes joined with spaces: `"%1$s %2$s ..."`.
    pub fn attributes<S: Into<String>>(codes: impl IntoIterator<Item = S>) -> NameSpec {
        let attributes: Vec<String> = codes.into_iter().map(Into::into).collect();
        let format = (1..=attributes.len())
            .map(|i| format!("%{i}$s"))
            .collect::<Vec<_>>()
            .join(" ");
        NameSpec { format, attributes }
    }

    pub fn with_format(format: impl Into<String>, codes: Vec<String>) -> NameSpec {
        NameSpec {
            format: format.into(),
            attributes: codes,
        }
    }
}

/// Declarative registration parameters for one class.
#[derive(Debug, Clone)]
pub struct ClassSpec {
    pub name: String,
    pub categories: Vec<String>,
    pub key_kind: KeyKind,

    /// None for a class with no storage of its own: its attributes live in
    /// (and are joined from) an ancestor's table.
    pub table: Option<String>,
    pub key_column: String,

    /// Discriminator column. Only meaningful on a root class; defaults to
    /// `finalclass` when the root has subclasses.
    pub class_column: Option<String>,

    pub name_spec: Option<NameSpec>,
    pub reconciliation_keys: Vec<String>,

    /// An abstract class never holds rows of its exact type; it is skipped
    /// when friendly-name branches are grouped per concrete subclass.
    pub abstract_class: bool,
}

impl ClassSpec {
    pub fn new(name: impl Into<String>) -> ClassSpec {
        ClassSpec {
            name: name.into(),
            categories: vec![],
            key_kind: KeyKind::AutoIncrement,
            table: None,
            key_column: "id".to_string(),
            class_column: None,
            name_spec: None,
            reconciliation_keys: vec![],
            abstract_class: false,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn key_kind(mut self, key_kind: KeyKind) -> Self {
        self.key_kind = key_kind;
        self
    }

    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    pub fn class_column(mut self, column: impl Into<String>) -> Self {
        self.class_column = Some(column.into());
        self
    }

    pub fn name_spec(mut self, spec: NameSpec) -> Self {
        self.name_spec = Some(spec);
        self
    }

    pub fn reconciliation_keys<S: Into<String>>(
        mut self,
        codes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.reconciliation_keys = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.abstract_class = true;
        self
    }
}

/// A fully built class descriptor.
#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub categories: Vec<String>,
    pub key_kind: KeyKind,
    pub table: Option<String>,
    pub key_column: String,
    pub class_column: Option<String>,
    pub name_spec: Option<NameSpec>,
    pub reconciliation_keys: Vec<String>,
    pub abstract_class: bool,

    /// Root of the lineage; the class itself when it has no parent.
    pub root: String,

    /// Ancestors, root first.
    pub parents: Vec<String>,

    /// All descendants, the class itself excluded.
    pub children: IndexSet<String>,

    pub attributes: IndexMap<String, Attribute>,

    /// Attribute code -> the class that introduced it. Inherited clones
    /// keep pointing at the introducing class; this is how the compiler
    /// knows which physical table carries a column.
    pub attribute_origins: IndexMap<String, String>,

    pub filters: IndexMap<String, FilterDef>,
    pub filter_origins: IndexMap<String, String>,

    /// Attributes dropped at registration time because they referenced a
    /// class that was never declared (partial module sets): code -> the
    /// missing class. Consulted by downstream passes, never queried.
    pub ignored: IndexMap<String, String>,

    /// External-key code -> codes of the external fields riding that key.
    pub ext_key_friends: IndexMap<String, Vec<String>>,
}

impl Class {
    pub(super) fn from_spec(spec: ClassSpec) -> Class {
        Class {
            root: spec.name.clone(),
            name: spec.name,
            categories: spec.categories,
            key_kind: spec.key_kind,
            table: spec.table,
            key_column: spec.key_column,
            class_column: spec.class_column,
            name_spec: spec.name_spec,
            reconciliation_keys: spec.reconciliation_keys,
            abstract_class: spec.abstract_class,
            parents: vec![],
            children: IndexSet::new(),
            attributes: IndexMap::new(),
            attribute_origins: IndexMap::new(),
            filters: IndexMap::new(),
            filter_origins: IndexMap::new(),
            ignored: IndexMap::new(),
            ext_key_friends: IndexMap::new(),
        }
    }

    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    pub fn attribute(&self, code: &str) -> Option<&Attribute> {
        self.attributes.get(code)
    }

    /// True if the attribute was introduced by this class (as opposed to
    /// inherited from an ancestor).
    pub fn is_attribute_origin(&self, code: &str) -> bool {
        self.attribute_origins.get(code).map(String::as_str) == Some(self.name.as_str())
    }
}
