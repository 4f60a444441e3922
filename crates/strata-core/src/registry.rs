mod attribute;
pub use attribute::{Attribute, AttributeKind, SqlColumn};

mod builder;
pub use builder::RegistryBuilder;

mod class;
pub use class::{Class, ClassSpec, KeyKind, NameSpec};

mod filter;
pub use filter::FilterDef;

mod name;

use crate::{Error, Result};

use indexmap::IndexMap;

/// Attribute codes reserved for the registry's own use; user declarations
/// with these codes are rejected.
pub const RESERVED_CODES: &[&str] = &["id", "finalclass", "friendlyname"];

/// The class registry: every class descriptor, attribute, filter and the
/// inheritance bookkeeping, immutable once built.
///
/// Built exactly once per process through [`RegistryBuilder`]; the builder
/// is consumed by `build`, so a second registration pass cannot happen.
/// Shared by reference with the compiler.
#[derive(Debug)]
pub struct Registry {
    pub(crate) classes: IndexMap<String, Class>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn class(&self, name: &str) -> Result<&Class> {
        self.classes
            .get(name)
            .ok_or_else(|| Error::unknown_class(name))
    }

    pub fn is_valid_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values()
    }

    /// Classes carrying the given category tag.
    pub fn classes_in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Class> {
        self.classes
            .values()
            .filter(move |class| class.categories.iter().any(|c| c == category))
    }

    pub fn root_class(&self, name: &str) -> Result<&Class> {
        let class = self.class(name)?;
        self.class(&class.root)
    }

    pub fn is_root_class(&self, name: &str) -> bool {
        match self.classes.get(name) {
            Some(class) => class.root == class.name,
            None => false,
        }
    }

    /// Ancestor classes of `name`, root first, the class itself excluded.
    pub fn parent_classes(&self, name: &str) -> Result<&[String]> {
        Ok(&self.class(name)?.parents)
    }

    /// Descendants of `name`, the class itself excluded.
    pub fn child_classes(&self, name: &str) -> Result<impl Iterator<Item = &str>> {
        Ok(self.class(name)?.children.iter().map(String::as_str))
    }

    /// The class itself plus all of its descendants, in declaration order.
    pub fn child_classes_all(&self, name: &str) -> Result<Vec<&str>> {
        let class = self.class(name)?;
        let mut all = vec![class.name.as_str()];
        all.extend(class.children.iter().map(String::as_str));
        Ok(all)
    }

    pub fn has_children(&self, name: &str) -> Result<bool> {
        Ok(!self.class(name)?.children.is_empty())
    }

    /// True if `parent` is `child` or one of its ancestors.
    pub fn is_parent_class(&self, parent: &str, child: &str) -> Result<bool> {
        let class = self.class(child)?;
        Ok(class.name == parent || class.parents.iter().any(|p| p == parent))
    }

    /// A standalone class is its own root and has no descendants; it gets
    /// no discriminator column.
    pub fn is_standalone(&self, name: &str) -> Result<bool> {
        let class = self.class(name)?;
        Ok(class.root == class.name && class.children.is_empty())
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.class(name)?.table.is_some())
    }

    pub fn table(&self, name: &str) -> Result<&str> {
        let class = self.class(name)?;
        class.table.as_deref().ok_or_else(|| {
            Error::definition(name, "class has no table of its own".to_string())
        })
    }

    pub fn key_column(&self, name: &str) -> Result<&str> {
        Ok(&self.class(name)?.key_column)
    }

    /// The class whose physical table stores rows of `name`: itself when it
    /// has a table, otherwise the nearest ancestor that does.
    pub fn storage_class(&self, name: &str) -> Result<&str> {
        let class = self.class(name)?;
        if class.has_table() {
            return Ok(&class.name);
        }
        for parent in class.parents.iter().rev() {
            if self.has_table(parent)? {
                return Ok(&self.class(parent)?.name);
            }
        }
        Err(Error::definition(
            name,
            "no table anywhere in the lineage".to_string(),
        ))
    }

    /// The discriminator column, owned by the lineage's root class.
    pub fn class_column(&self, name: &str) -> Result<&str> {
        let root = self.root_class(name)?;
        root.class_column.as_deref().ok_or_else(|| {
            Error::definition(&root.name, "root class has no discriminator column".to_string())
        })
    }

    pub fn attribute(&self, class: &str, code: &str) -> Result<&Attribute> {
        self.class(class)?
            .attributes
            .get(code)
            .ok_or_else(|| Error::unknown_attribute(class, code))
    }

    pub fn is_valid_attribute(&self, class: &str, code: &str) -> bool {
        self.classes
            .get(class)
            .is_some_and(|c| c.attributes.contains_key(code))
    }

    /// The class that introduced the attribute: the one whose physical
    /// table truly carries the column.
    pub fn attribute_origin(&self, class: &str, code: &str) -> Result<&str> {
        self.class(class)?
            .attribute_origins
            .get(code)
            .map(String::as_str)
            .ok_or_else(|| Error::unknown_attribute(class, code))
    }

    /// External-key attribute codes of a class (hierarchical keys
    /// included).
    pub fn external_keys(&self, class: &str) -> Result<impl Iterator<Item = (&str, &Attribute)>> {
        Ok(self
            .class(class)?
            .attributes
            .iter()
            .filter(|(_, att)| att.is_external_key())
            .map(|(code, att)| (code.as_str(), att)))
    }

    /// External fields of `class` riding the external key `key_code`.
    pub fn external_fields(&self, class: &str, key_code: &str) -> Result<Vec<&Attribute>> {
        Ok(self
            .class(class)?
            .attributes
            .values()
            .filter(|att| match &att.kind {
                AttributeKind::ExternalField { key_attr, .. } => key_attr == key_code,
                _ => false,
            })
            .collect())
    }

    /// Attribute codes recomputed alongside the external key `key_code`
    /// (the key's "friend" fields).
    pub fn ext_key_friends(&self, class: &str, key_code: &str) -> Result<&[String]> {
        Ok(self
            .class(class)?
            .ext_key_friends
            .get(key_code)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    pub fn filter(&self, class: &str, code: &str) -> Result<&FilterDef> {
        self.class(class)?
            .filters
            .get(code)
            .ok_or_else(|| Error::unknown_filter(class, code))
    }

    /// The friendly-name expression of a class, over the given class alias.
    pub fn name_expression(&self, class: &str, alias: &str) -> Result<crate::Expr> {
        name::name_expression(self, class, alias)
    }

    /// The friendly-name expression covering a class and its concrete
    /// subclasses, branching on the discriminator where name specs differ.
    pub fn extended_name_expression(&self, class: &str, alias: &str) -> Result<crate::Expr> {
        name::extended_name_expression(self, class, alias)
    }
}
