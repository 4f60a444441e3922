use super::{Attribute, AttributeKind, Class, ClassSpec, FilterDef, Registry, RESERVED_CODES};
use crate::{Error, Result};

use indexmap::IndexMap;

/// Accumulates class declarations and produces the immutable [`Registry`].
///
/// Registration order matters the way module loading does: a class must be
/// declared before a subclass inherits from it, and before another class
/// points an external key at it. Attributes whose target class never shows
/// up are tolerated (recorded as ignored) so a partial module set still
/// builds.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    classes: IndexMap<String, Class>,
}

impl RegistryBuilder {
    pub fn new() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn declare(&mut self, spec: ClassSpec) -> Result<()> {
        if self.classes.contains_key(&spec.name) {
            return Err(Error::definition(&spec.name, "class declared twice"));
        }
        let class = Class::from_spec(spec);
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    /// Makes `target` a subclass of `source`: clone-merges the source's
    /// attributes and filters (origins preserved), extends the lineage
    /// bookkeeping, and propagates the ignored set.
    ///
    /// Call right after declaring `target`, before adding its own
    /// attributes.
    pub fn inherit(&mut self, target: &str, source: &str) -> Result<()> {
        if target == source {
            return Err(Error::definition(target, "class cannot inherit from itself"));
        }
        let source_class = self
            .classes
            .get(source)
            .ok_or_else(|| Error::unknown_class(source))?
            .clone();

        let target_class = self
            .classes
            .get_mut(target)
            .ok_or_else(|| Error::unknown_class(target))?;

        target_class.root = source_class.root.clone();
        target_class.parents = source_class.parents.clone();
        target_class.parents.push(source_class.name.clone());

        for (code, att) in &source_class.attributes {
            target_class.attributes.insert(code.clone(), att.clone());
        }
        for (code, origin) in &source_class.attribute_origins {
            target_class
                .attribute_origins
                .insert(code.clone(), origin.clone());
        }
        for (code, filter) in &source_class.filters {
            target_class.filters.insert(code.clone(), filter.clone());
        }
        for (code, origin) in &source_class.filter_origins {
            target_class
                .filter_origins
                .insert(code.clone(), origin.clone());
        }
        for (code, missing) in &source_class.ignored {
            target_class.ignored.insert(code.clone(), missing.clone());
        }

        let ancestors = target_class.parents.clone();
        for ancestor in &ancestors {
            if let Some(a) = self.classes.get_mut(ancestor) {
                a.children.insert(target.to_string());
            }
        }
        Ok(())
    }

    /// Registers an attribute on a class.
    ///
    /// Reserved codes and duplicates are rejected (duplicates name the
    /// introducing class). An attribute whose external target class is not
    /// declared is silently recorded as ignored; an external field whose
    /// key was ignored is ignored along with it.
    pub fn add_attribute(&mut self, class: &str, att: Attribute) -> Result<()> {
        if RESERVED_CODES.contains(&att.code.as_str()) {
            return Err(Error::definition(
                class,
                format!("attribute code '{}' is reserved", att.code),
            ));
        }
        let host = self
            .classes
            .get(class)
            .ok_or_else(|| Error::unknown_class(class))?;
        if let Some(origin) = host.attribute_origins.get(&att.code) {
            return Err(Error::definition(
                class,
                format!(
                    "attribute '{}' already declared by class '{}'",
                    att.code, origin
                ),
            ));
        }

        let missing_target = match &att.kind {
            AttributeKind::ExternalKey { target_class, .. }
                if !self.classes.contains_key(target_class) =>
            {
                Some(target_class.clone())
            }
            AttributeKind::LinkSet { linked_class, .. }
                if !self.classes.contains_key(linked_class) =>
            {
                Some(linked_class.clone())
            }
            AttributeKind::ExternalField { key_attr, .. } => {
                if let Some(missing) = host.ignored.get(key_attr) {
                    Some(missing.clone())
                } else if !host
                    .attributes
                    .get(key_attr)
                    .is_some_and(Attribute::is_external_key)
                {
                    return Err(Error::definition(
                        class,
                        format!(
                            "external field '{}' rides unknown external key '{}'",
                            att.code, key_attr
                        ),
                    ));
                } else {
                    None
                }
            }
            _ => None,
        };

        let host = self
            .classes
            .get_mut(class)
            .ok_or_else(|| Error::unknown_class(class))?;
        if let Some(missing) = missing_target {
            host.ignored.insert(att.code.clone(), missing);
            return Ok(());
        }

        host.attribute_origins
            .insert(att.code.clone(), class.to_string());
        if let Some(filter) = FilterDef::for_attribute(&att) {
            host.filters.insert(att.code.clone(), filter);
            host.filter_origins
                .insert(att.code.clone(), class.to_string());
        }
        host.attributes.insert(att.code.clone(), att);
        Ok(())
    }

    /// The finalize pass. Consumes the builder, so a second registration
    /// pass is impossible by construction.
    pub fn build(mut self) -> Result<Registry> {
        let names: Vec<String> = self.classes.keys().cloned().collect();

        for name in &names {
            let class = self.class(name)?;
            if class.root != class.name && class.class_column.is_some() {
                return Err(Error::definition(
                    name,
                    format!(
                        "discriminator column belongs to the root class '{}'",
                        class.root
                    ),
                ));
            }
        }

        self.inject_discriminators(&names)?;
        self.inject_friendly_names(&names)?;
        self.inject_key_companions(&names)?;
        self.validate_external_fields(&names)?;
        self.compute_ext_key_friends(&names)?;

        for name in &names {
            let class = self.class_mut(name)?;
            if class.filters.contains_key("id") {
                return Err(Error::definition(name, "filter code 'id' is reserved"));
            }
            class.filters.insert("id".to_string(), FilterDef::key("id"));
            class.filter_origins.insert("id".to_string(), name.clone());
        }

        Ok(Registry {
            classes: self.classes,
        })
    }

    fn class(&self, name: &str) -> Result<&Class> {
        self.classes
            .get(name)
            .ok_or_else(|| Error::unknown_class(name))
    }

    fn class_mut(&mut self, name: &str) -> Result<&mut Class> {
        self.classes
            .get_mut(name)
            .ok_or_else(|| Error::unknown_class(name))
    }

    /// Root classes with subclasses get the `finalclass` discriminator:
    /// a stored column on the root, fixed-value clones on every descendant.
    fn inject_discriminators(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let class = self.class(name)?;
            if class.root != class.name || class.children.is_empty() {
                continue;
            }
            let column = class
                .class_column
                .clone()
                .unwrap_or_else(|| "finalclass".to_string());
            let descendants: Vec<String> = class.children.iter().cloned().collect();

            let root = self.class_mut(name)?;
            root.class_column = Some(column.clone());
            let att = Attribute::final_class("finalclass", &column).with_default(name.as_str());
            Self::inject(root, att, name.clone());

            for sub in descendants {
                let class = self.class_mut(&sub)?;
                let att = Attribute::final_class("finalclass", &column)
                    .with_fixed_value(sub.as_str());
                Self::inject(class, att, name.clone());
            }
        }
        Ok(())
    }

    fn inject_friendly_names(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let class = self.class_mut(name)?;
            let att = Attribute::friendly_name("friendlyname", "id");
            Self::inject(class, att, name.clone());
        }
        Ok(())
    }

    /// Per external key: the friendly name seen through the key and, when
    /// the target class has subclasses, the recalled discriminator. External
    /// fields that copy a remote key get their own chained friendly name.
    fn inject_key_companions(&mut self, names: &[String]) -> Result<()> {
        let mut planned: Vec<(String, Attribute, String)> = vec![];

        for name in names {
            let class = self.class(name)?;
            for (code, att) in &class.attributes {
                if !att.is_external_key() {
                    continue;
                }
                let target = att.target_class().unwrap_or(name);
                let origin = class
                    .attribute_origins
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| name.clone());
                planned.push((
                    name.clone(),
                    Attribute::friendly_name(format!("{code}_friendlyname"), code),
                    origin.clone(),
                ));
                let target_has_children = self
                    .classes
                    .get(target)
                    .is_some_and(|t| !t.children.is_empty());
                if target_has_children {
                    planned.push((
                        name.clone(),
                        Attribute::external_field(
                            format!("{code}_finalclass_recall"),
                            code,
                            "finalclass",
                        ),
                        origin,
                    ));
                }
            }
        }

        for name in names {
            let class = self.class(name)?;
            for (code, att) in &class.attributes {
                let AttributeKind::ExternalField {
                    key_attr,
                    target_attr,
                } = &att.kind
                else {
                    continue;
                };
                let Some(key) = class.attributes.get(key_attr) else {
                    continue;
                };
                let remote = match &key.kind {
                    AttributeKind::ExternalKey { target_class, .. } => target_class.clone(),
                    AttributeKind::HierarchicalKey { .. } => name.clone(),
                    _ => continue,
                };
                let remote_is_key = self
                    .classes
                    .get(&remote)
                    .and_then(|r| r.attributes.get(target_attr))
                    .is_some_and(Attribute::is_external_key);
                if remote_is_key {
                    let origin = class
                        .attribute_origins
                        .get(code)
                        .cloned()
                        .unwrap_or_else(|| name.clone());
                    planned.push((
                        name.clone(),
                        Attribute::external_field(
                            format!("{code}_friendlyname"),
                            key_attr,
                            format!("{target_attr}_friendlyname"),
                        ),
                        origin,
                    ));
                }
            }
        }

        for (name, att, origin) in planned {
            let class = self.class_mut(&name)?;
            if class.attributes.contains_key(&att.code) {
                continue;
            }
            Self::inject(class, att, origin);
        }
        Ok(())
    }

    /// Every external field must copy an attribute the remote class
    /// actually declares. Runs after the companion injections so chained
    /// friendly names resolve too.
    fn validate_external_fields(&self, names: &[String]) -> Result<()> {
        for name in names {
            let class = self.class(name)?;
            for (code, att) in &class.attributes {
                let AttributeKind::ExternalField {
                    key_attr,
                    target_attr,
                } = &att.kind
                else {
                    continue;
                };
                if target_attr == "id" {
                    continue;
                }
                let Some(key) = class.attributes.get(key_attr) else {
                    continue;
                };
                let remote = match &key.kind {
                    AttributeKind::ExternalKey { target_class, .. } => target_class.as_str(),
                    AttributeKind::HierarchicalKey { .. } => name.as_str(),
                    _ => continue,
                };
                let known = self
                    .classes
                    .get(remote)
                    .is_some_and(|r| r.attributes.contains_key(target_attr));
                if !known {
                    return Err(Error::definition(
                        name,
                        format!(
                            "external field '{code}' targets unknown attribute \
                             '{target_attr}' of class '{remote}'"
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// External-key code -> the computed attributes riding that key, used
    /// to refresh copied values alongside the key itself.
    fn compute_ext_key_friends(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let class = self.class(name)?;
            let mut friends: IndexMap<String, Vec<String>> = IndexMap::new();
            for (code, att) in &class.attributes {
                let Some(key) = att.key_attr() else { continue };
                if key == "id" {
                    continue;
                }
                friends.entry(key.to_string()).or_default().push(code.clone());
            }
            self.class_mut(name)?.ext_key_friends = friends;
        }
        Ok(())
    }

    fn inject(class: &mut Class, att: Attribute, origin: String) {
        class.attribute_origins.insert(att.code.clone(), origin.clone());
        if let Some(filter) = FilterDef::for_attribute(&att) {
            class.filters.insert(att.code.clone(), filter);
            class.filter_origins.insert(att.code.clone(), origin);
        }
        class.attributes.insert(att.code.clone(), att);
    }
}
