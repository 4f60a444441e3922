use indexmap::{IndexMap, IndexSet};
use strata_core::{Error, Result};

/// Alias bookkeeping for one compilation: class aliases seeded from the
/// search, table aliases generated as physical tables are joined. The two
/// namespaces share the rendered SQL, so both are checked on every grab.
#[derive(Debug, Default)]
pub(super) struct BuildContext {
    class_aliases: IndexMap<String, String>,
    table_aliases: IndexSet<String>,
}

impl BuildContext {
    pub(super) fn seed(selected: &IndexMap<String, String>) -> BuildContext {
        BuildContext {
            class_aliases: selected.clone(),
            table_aliases: IndexSet::new(),
        }
    }

    pub(super) fn generate_class_alias(&mut self, base: &str, class: &str) -> Result<String> {
        let alias = self.grab(base, class)?;
        self.class_aliases.insert(alias.clone(), class.to_string());
        Ok(alias)
    }

    pub(super) fn generate_table_alias(&mut self, base: &str) -> Result<String> {
        let alias = self.grab(base, base)?;
        self.table_aliases.insert(alias.clone());
        Ok(alias)
    }

    /// Records the main table alias of a queried class, which reuses the
    /// class alias by design.
    pub(super) fn claim_table_alias(&mut self, alias: &str) {
        self.table_aliases.insert(alias.to_string());
    }

    fn grab(&self, base: &str, subject: &str) -> Result<String> {
        if self.is_free(base) {
            return Ok(base.to_string());
        }
        for n in 1..=100u32 {
            let candidate = format!("{base}{n}");
            if self.is_free(&candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::definition(
            subject,
            format!("cannot allocate a unique alias for '{base}'"),
        ))
    }

    fn is_free(&self, candidate: &str) -> bool {
        !self.class_aliases.contains_key(candidate) && !self.table_aliases.contains(candidate)
    }
}
