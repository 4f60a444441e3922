use crate::{Error, Expr, Result, Value};

use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fmt::Write;

/// How a pointing-to join matches the target: plain key equality, or a
/// position relative to the target in its nested-set hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeOperator {
    Equals,
    Below,
    BelowStrict,
    Above,
    AboveStrict,
}

impl TreeOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            TreeOperator::Equals => "=",
            TreeOperator::Below => "BELOW",
            TreeOperator::BelowStrict => "BELOW STRICT",
            TreeOperator::Above => "ABOVE",
            TreeOperator::AboveStrict => "ABOVE STRICT",
        }
    }
}

/// A relation-closure criterion: restrict to objects reachable from the
/// result of `search` through `relation` within `max_depth` steps.
#[derive(Debug, Clone)]
pub struct RelatedCriterion {
    pub search: Search,
    pub relation: String,
    pub max_depth: u32,
}

/// Per-plugin key/value properties carried by a search and handed to the
/// visibility collaborator; folded (sorted) into the cache signature.
#[derive(Debug, Clone, Default)]
pub struct ModifierProperties {
    props: IndexMap<String, IndexMap<String, serde_json::Value>>,
}

impl ModifierProperties {
    pub fn set(
        &mut self,
        plugin: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) {
        self.props
            .entry(plugin.into())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn get(&self, plugin: &str, key: &str) -> Option<&serde_json::Value> {
        self.props.get(plugin)?.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Key-sorted JSON text: equal property sets yield equal signatures
    /// whatever the insertion order was.
    pub fn canonical(&self) -> String {
        let sorted: BTreeMap<&str, BTreeMap<&str, &serde_json::Value>> = self
            .props
            .iter()
            .map(|(plugin, entries)| {
                (
                    plugin.as_str(),
                    entries
                        .iter()
                        .map(|(k, v)| (k.as_str(), v))
                        .collect::<BTreeMap<_, _>>(),
                )
            })
            .collect();
        serde_json::to_string(&sorted).unwrap_or_default()
    }
}

/// A query request: the queried class, a condition tree and the joins to
/// other searches, independent of any physical schema.
///
/// Joins normalize on attach: the sub-search's aliases are made unique
/// against the aggregate alias map (renames are pushed through its
/// condition) and its condition is hoisted onto the root, so the compiler
/// always finds the whole condition at the top.
#[derive(Debug, Clone)]
pub struct Search {
    pub class: String,
    pub alias: String,
    pub condition: Expr,

    /// key attribute -> tree operator -> searches on the target class
    pub pointing_to: IndexMap<String, IndexMap<TreeOperator, Vec<Search>>>,

    /// foreign class -> foreign key attribute -> search on the foreign class
    pub referenced_by: IndexMap<String, IndexMap<String, Search>>,

    pub related_to: Vec<RelatedCriterion>,

    /// Needles each of which must appear somewhere in the object's text
    pub full_text: Vec<String>,

    /// Aggregate alias map: alias -> class, the root first.
    pub selected: IndexMap<String, String>,

    pub modifier_props: ModifierProperties,

    /// Named argument values bundled with the search
    pub params: IndexMap<String, Value>,

    /// Set once a visibility restriction has been spliced in, so it does
    /// not get applied twice.
    pub data_filtered: bool,

    /// Caller's explicit opt-out of visibility filtering.
    pub allow_all_data: bool,
}

impl Search {
    /// A search over `class`, aliased by the class name.
    pub fn new(class: impl Into<String>) -> Search {
        let class = class.into();
        Search::with_alias(class.clone(), class)
    }

    pub fn with_alias(class: impl Into<String>, alias: impl Into<String>) -> Search {
        let class = class.into();
        let alias = alias.into();
        let mut selected = IndexMap::new();
        selected.insert(alias.clone(), class.clone());
        Search {
            class,
            alias,
            condition: Expr::always_true(),
            pointing_to: IndexMap::new(),
            referenced_by: IndexMap::new(),
            related_to: vec![],
            full_text: vec![],
            selected,
            modifier_props: ModifierProperties::default(),
            params: IndexMap::new(),
            data_filtered: false,
            allow_all_data: false,
        }
    }

    /// AND-combines a condition onto the search.
    pub fn add_condition(&mut self, expr: Expr) {
        let current = std::mem::replace(&mut self.condition, Expr::always_true());
        self.condition = Expr::and(current, expr);
    }

    /// Restricts to objects whose friendly name equals `name`.
    pub fn add_name_condition(&mut self, name: &str) {
        let field = Expr::field(self.alias.as_str(), "friendlyname");
        self.add_condition(Expr::eq(field, Expr::value(name)));
    }

    pub fn add_full_text(&mut self, needle: impl Into<String>) {
        self.full_text.push(needle.into());
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn set_modifier_property(
        &mut self,
        plugin: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) {
        self.modifier_props.set(plugin, key, value);
    }

    pub fn selected_classes(&self) -> &IndexMap<String, String> {
        &self.selected
    }

    /// Joins a search on the class my external key `key_attr` points to.
    pub fn join_pointing_to(
        &mut self,
        key_attr: impl Into<String>,
        op: TreeOperator,
        mut sub: Search,
    ) -> Result<()> {
        self.absorb(&mut sub)?;
        self.pointing_to
            .entry(key_attr.into())
            .or_default()
            .entry(op)
            .or_default()
            .push(sub);
        Ok(())
    }

    /// Joins a search on a foreign class whose key `foreign_key_attr`
    /// points back at me.
    pub fn join_referenced_by(
        &mut self,
        foreign_key_attr: impl Into<String>,
        mut sub: Search,
    ) -> Result<()> {
        let foreign_key_attr = foreign_key_attr.into();
        let foreign_class = sub.class.clone();
        match self
            .referenced_by
            .get_mut(&foreign_class)
            .and_then(|by_key| by_key.get_mut(&foreign_key_attr))
        {
            Some(existing) => existing.merge_with(sub),
            None => {
                self.absorb(&mut sub)?;
                self.referenced_by
                    .entry(foreign_class)
                    .or_default()
                    .insert(foreign_key_attr, sub);
                Ok(())
            }
        }
    }

    /// Restricts to objects related to the result of `search` through
    /// `relation`, up to `max_depth` steps.
    pub fn join_related_to(
        &mut self,
        search: Search,
        relation: impl Into<String>,
        max_depth: u32,
    ) {
        self.related_to.push(RelatedCriterion {
            search,
            relation: relation.into(),
            max_depth,
        });
    }

    /// AND-combines another search on the same class, the way a visibility
    /// restriction is spliced in: its root alias is folded onto mine, its
    /// other aliases made unique, its condition and joins merged.
    pub fn merge_with(&mut self, mut other: Search) -> Result<()> {
        if other.class != self.class {
            return Err(Error::definition(
                &self.class,
                format!("cannot merge a search on class '{}'", other.class),
            ));
        }
        let old = other.alias.clone();
        let target = self.alias.clone();
        other.rename_alias(&old, &target);
        other.selected.shift_remove(&target);
        let sub_aliases: Vec<String> = other.selected.keys().cloned().collect();
        for alias in sub_aliases {
            if self.selected.contains_key(&alias) {
                let unique = self.unique_alias(&other, &alias)?;
                other.rename_alias(&alias, &unique);
            }
        }
        for (alias, class) in std::mem::take(&mut other.selected) {
            self.selected.insert(alias, class);
        }
        self.add_condition(other.condition);
        for (key, by_op) in other.pointing_to {
            let slot = self.pointing_to.entry(key).or_default();
            for (op, subs) in by_op {
                slot.entry(op).or_default().extend(subs);
            }
        }
        for (foreign_class, by_key) in other.referenced_by {
            let slot = self.referenced_by.entry(foreign_class).or_default();
            for (foreign_key, sub) in by_key {
                match slot.get_mut(&foreign_key) {
                    Some(existing) => existing.merge_with(sub)?,
                    None => {
                        slot.insert(foreign_key, sub);
                    }
                }
            }
        }
        self.related_to.extend(other.related_to);
        self.full_text.extend(other.full_text);
        for (name, value) in other.params {
            self.params.entry(name).or_insert(value);
        }
        Ok(())
    }

    /// Canonical text: the cache signature component and the query named in
    /// diagnostics.
    pub fn to_canonical(&self) -> String {
        let mut out = format!("SELECT {}", self.class);
        if self.alias != self.class {
            let _ = write!(out, " AS {}", self.alias);
        }
        self.render_joins(&mut out);
        if !self.condition.is_true() {
            let _ = write!(out, " WHERE {}", self.condition.render());
        }
        for needle in &self.full_text {
            let _ = write!(out, " MATCHES '{needle}'");
        }
        out
    }

    fn render_joins(&self, out: &mut String) {
        for (key, by_op) in &self.pointing_to {
            for (op, subs) in by_op {
                for sub in subs {
                    let _ = write!(
                        out,
                        " JOIN {} AS {} ON {}.{} {} {}.id",
                        sub.class,
                        sub.alias,
                        self.alias,
                        key,
                        op.symbol(),
                        sub.alias
                    );
                    sub.render_joins(out);
                }
            }
        }
        for by_key in self.referenced_by.values() {
            for (foreign_key, sub) in by_key {
                let _ = write!(
                    out,
                    " JOIN {} AS {} ON {}.{} = {}.id",
                    sub.class, sub.alias, sub.alias, foreign_key, self.alias
                );
                sub.render_joins(out);
            }
        }
    }

    /// Normalize-on-attach: unique aliases, then hoist the sub-condition
    /// and merge the bookkeeping.
    fn absorb(&mut self, sub: &mut Search) -> Result<()> {
        let sub_aliases: Vec<String> = sub.selected.keys().cloned().collect();
        for alias in sub_aliases {
            if self.selected.contains_key(&alias) {
                let unique = self.unique_alias(sub, &alias)?;
                sub.rename_alias(&alias, &unique);
            }
        }
        let hoisted = std::mem::replace(&mut sub.condition, Expr::always_true());
        self.add_condition(hoisted);
        for (alias, class) in &sub.selected {
            self.selected.insert(alias.clone(), class.clone());
        }
        for (name, value) in std::mem::take(&mut sub.params) {
            self.params.entry(name).or_insert(value);
        }
        self.full_text.append(&mut sub.full_text);
        Ok(())
    }

    fn unique_alias(&self, sub: &Search, base: &str) -> Result<String> {
        for n in 1..=100u32 {
            let candidate = format!("{base}{n}");
            if !self.selected.contains_key(&candidate) && !sub.selected.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::definition(
            &self.class,
            format!("cannot allocate a unique alias for '{base}'"),
        ))
    }

    /// Renames a class alias throughout: the alias map, the condition, and
    /// every nested search.
    pub fn rename_alias(&mut self, old: &str, new: &str) {
        if self.alias == old {
            self.alias = new.to_string();
        }
        self.selected = self
            .selected
            .iter()
            .map(|(alias, class)| {
                let alias = if alias == old { new.to_string() } else { alias.clone() };
                (alias, class.clone())
            })
            .collect();
        self.condition = self.condition.rename_alias(old, new);
        for by_op in self.pointing_to.values_mut() {
            for subs in by_op.values_mut() {
                for sub in subs {
                    sub.rename_alias(old, new);
                }
            }
        }
        for by_key in self.referenced_by.values_mut() {
            for sub in by_key.values_mut() {
                sub.rename_alias(old, new);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_with_condition() {
        let mut search = Search::new("Person");
        search.add_condition(Expr::eq(Expr::field("Person", "status"), Expr::value("open")));
        assert_eq!(
            search.to_canonical(),
            "SELECT Person WHERE (`Person`.`status` = 'open')"
        );
    }

    #[test]
    fn join_hoists_the_sub_condition() {
        let mut org = Search::new("Organization");
        org.add_condition(Expr::eq(
            Expr::field("Organization", "name"),
            Expr::value("Demo"),
        ));
        let mut person = Search::new("Person");
        person
            .join_pointing_to("org_id", TreeOperator::Equals, org)
            .unwrap();

        assert_eq!(
            person.to_canonical(),
            "SELECT Person \
             JOIN Organization AS Organization ON Person.org_id = Organization.id \
             WHERE (`Organization`.`name` = 'Demo')"
        );
        let sub = &person.pointing_to["org_id"][&TreeOperator::Equals][0];
        assert!(sub.condition.is_true());
    }

    #[test]
    fn colliding_sub_alias_is_renamed_and_translated() {
        let mut manager = Search::new("Person");
        manager.add_condition(Expr::eq(Expr::field("Person", "status"), Expr::value("active")));
        let mut person = Search::new("Person");
        person
            .join_pointing_to("manager_id", TreeOperator::Equals, manager)
            .unwrap();

        let sub = &person.pointing_to["manager_id"][&TreeOperator::Equals][0];
        assert_eq!(sub.alias, "Person1");
        assert_eq!(
            person.condition.render(),
            "(`Person1`.`status` = 'active')"
        );
        assert_eq!(
            person.selected.keys().collect::<Vec<_>>(),
            ["Person", "Person1"]
        );
    }

    #[test]
    fn modifier_props_canonical_is_sorted() {
        let mut props = ModifierProperties::default();
        props.set("plugin_b", "z", serde_json::json!(1));
        props.set("plugin_a", "k", serde_json::json!("v"));
        assert_eq!(
            props.canonical(),
            r#"{"plugin_a":{"k":"v"},"plugin_b":{"z":1}}"#
        );
    }
}
