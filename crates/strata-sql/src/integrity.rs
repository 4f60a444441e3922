//! Cross-table consistency checks over the physical model.
//!
//! The checker never writes; it reads the tables of every lineage and
//! reports the rows that violate the model, each with a proposed fix. The
//! fixes cascade: deleting a dangling row may strand rows pointing at it,
//! so key checks repeat until no new deletion is planned.

use indexmap::{IndexMap, IndexSet};
use strata_core::driver::{Connection, Escaper};
use strata_core::registry::AttributeKind;
use strata_core::{Registry, Result, Value};

#[derive(Debug, Clone)]
pub enum ProposedFix {
    Delete,
    Update { column: String, new_value: Value },
}

#[derive(Debug, Clone)]
pub struct IntegrityIssue {
    pub root_class: String,
    pub table: String,
    pub key_column: String,
    pub record_id: i64,
    pub reason: String,
    pub fix: ProposedFix,
}

#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// The SQL statements that would apply every proposed fix, deletions
    /// grouped per table.
    pub fn fixup_script(&self, escaper: &dyn Escaper) -> String {
        let mut deletes: IndexMap<(&str, &str), Vec<i64>> = IndexMap::new();
        let mut lines = vec![];
        for issue in &self.issues {
            match &issue.fix {
                ProposedFix::Delete => deletes
                    .entry((issue.table.as_str(), issue.key_column.as_str()))
                    .or_default()
                    .push(issue.record_id),
                ProposedFix::Update { column, new_value } => lines.push(format!(
                    "UPDATE `{}` SET `{}` = {} WHERE `{}` = {};",
                    issue.table,
                    column,
                    escaper.quote(new_value),
                    issue.key_column,
                    issue.record_id,
                )),
            }
        }
        for ((table, key_column), ids) in deletes {
            let list = ids
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!(
                "DELETE FROM `{table}` WHERE `{key_column}` IN ({list});"
            ));
        }
        lines.join("\n")
    }
}

struct KeySpec {
    origin_class: String,
    origin_root: String,
    code: String,
    table: String,
    key_column: String,
    column: String,
    target_root: String,
    target_table: String,
    target_key: String,
    nullable: bool,

    /// Tables a row of this extent spans, root first; a deletion must hit
    /// all of them.
    lineage_tables: Vec<(String, String)>,
}

struct EnumSpec {
    origin_root: String,
    table: String,
    key_column: String,
    column: String,
    allowed: Vec<String>,
    default: Value,
}

pub struct IntegrityChecker<'a> {
    registry: &'a Registry,
    conn: &'a mut dyn Connection,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(registry: &'a Registry, conn: &'a mut dyn Connection) -> IntegrityChecker<'a> {
        IntegrityChecker { registry, conn }
    }

    pub fn check(&mut self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();

        // ids planned for deletion, per root class
        let mut deleted: IndexMap<String, IndexSet<i64>> = IndexMap::new();

        let roots: Vec<String> = self
            .registry
            .classes()
            .filter(|c| c.root == c.name && c.has_table())
            .map(|c| c.name.clone())
            .collect();
        for root in &roots {
            self.check_discriminators(root, &mut report, &mut deleted)?;
            self.check_lineage_rows(root, &mut report)?;
        }
        self.check_enumerations(&mut report)?;
        self.check_external_keys(&mut report, &mut deleted)?;
        Ok(report)
    }

    /// Every row of a root table with descendants must carry a final class
    /// naming a concrete class of the lineage.
    fn check_discriminators(
        &mut self,
        root: &str,
        report: &mut IntegrityReport,
        deleted: &mut IndexMap<String, IndexSet<i64>>,
    ) -> Result<()> {
        if !self.registry.has_children(root)? {
            return Ok(());
        }
        let table = self.registry.table(root)?.to_string();
        let key_column = self.registry.key_column(root)?.to_string();
        let class_column = self.registry.class_column(root)?.to_string();
        let concrete: IndexSet<String> = self
            .registry
            .child_classes_all(root)?
            .into_iter()
            .filter(|name| {
                self.registry
                    .class(name)
                    .map(|c| !c.abstract_class)
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect();

        for (id, value) in self.fetch_column(&table, &key_column, &class_column)? {
            let named = match &value {
                Value::String(name) => concrete.contains(name),
                _ => false,
            };
            if named {
                continue;
            }
            report.issues.push(IntegrityIssue {
                root_class: root.to_string(),
                table: table.clone(),
                key_column: key_column.clone(),
                record_id: id,
                reason: format!("final class {value} does not name a concrete class of '{root}'"),
                fix: ProposedFix::Delete,
            });
            deleted.entry(root.to_string()).or_default().insert(id);
        }
        Ok(())
    }

    /// A row of a subclass table must have its counterpart in the root
    /// table, and a root row whose final class owns a table must have its
    /// counterpart there.
    fn check_lineage_rows(&mut self, root: &str, report: &mut IntegrityReport) -> Result<()> {
        if !self.registry.has_children(root)? {
            return Ok(());
        }
        let root_table = self.registry.table(root)?.to_string();
        let root_key = self.registry.key_column(root)?.to_string();
        let class_column = self.registry.class_column(root)?.to_string();

        let root_rows = self.fetch_column(&root_table, &root_key, &class_column)?;
        let root_ids: IndexSet<i64> = root_rows.iter().map(|(id, _)| *id).collect();

        let descendants: Vec<String> = self
            .registry
            .child_classes_all(root)?
            .into_iter()
            .map(str::to_string)
            .collect();
        for descendant in descendants {
            if descendant == root || !matches!(self.registry.has_table(&descendant), Ok(true)) {
                continue;
            }
            let table = self.registry.table(&descendant)?.to_string();
            let key_column = self.registry.key_column(&descendant)?.to_string();
            let own_ids = self.fetch_ids(&table, &key_column)?;

            for id in own_ids.difference(&root_ids) {
                report.issues.push(IntegrityIssue {
                    root_class: root.to_string(),
                    table: table.clone(),
                    key_column: key_column.clone(),
                    record_id: *id,
                    reason: format!("no counterpart in the root table `{root_table}`"),
                    fix: ProposedFix::Delete,
                });
            }

            // root rows of this branch missing their subclass row
            let mut expected: IndexSet<i64> = IndexSet::new();
            for (id, value) in &root_rows {
                if let Value::String(final_class) = value {
                    if self.registry.is_valid_class(final_class)
                        && self.registry.is_parent_class(&descendant, final_class)?
                    {
                        expected.insert(*id);
                    }
                }
            }
            for id in expected.difference(&own_ids) {
                report.issues.push(IntegrityIssue {
                    root_class: root.to_string(),
                    table: root_table.clone(),
                    key_column: root_key.clone(),
                    record_id: *id,
                    reason: format!("no counterpart in the subclass table `{table}`"),
                    fix: ProposedFix::Delete,
                });
            }
        }
        Ok(())
    }

    /// Scalars restricted to an enumeration must hold an allowed value.
    fn check_enumerations(&mut self, report: &mut IntegrityReport) -> Result<()> {
        let mut specs = vec![];
        for class in self.registry.classes() {
            for (code, att) in &class.attributes {
                if !class.is_attribute_origin(code) {
                    continue;
                }
                let Some(allowed) = &att.allowed_values else {
                    continue;
                };
                let Some(column) = att.first_column() else {
                    continue;
                };
                let storage = self.registry.storage_class(&class.name)?;
                specs.push(EnumSpec {
                    origin_root: class.root.clone(),
                    table: self.registry.table(storage)?.to_string(),
                    key_column: self.registry.key_column(storage)?.to_string(),
                    column,
                    allowed: allowed.clone(),
                    default: att.default.clone(),
                });
            }
        }

        for spec in specs {
            for (id, value) in self.fetch_column(&spec.table, &spec.key_column, &spec.column)? {
                let Value::String(text) = &value else {
                    continue;
                };
                if spec.allowed.iter().any(|a| a == text) {
                    continue;
                }
                report.issues.push(IntegrityIssue {
                    root_class: spec.origin_root.clone(),
                    table: spec.table.clone(),
                    key_column: spec.key_column.clone(),
                    record_id: id,
                    reason: format!("value '{text}' is not in the allowed set of `{}`", spec.column),
                    fix: ProposedFix::Update {
                        column: spec.column.clone(),
                        new_value: spec.default.clone(),
                    },
                });
            }
        }
        Ok(())
    }

    /// External keys must point at existing rows. Nullable keys are reset,
    /// mandatory ones take the whole row down; passes repeat so a planned
    /// deletion strands no referrer.
    fn check_external_keys(
        &mut self,
        report: &mut IntegrityReport,
        deleted: &mut IndexMap<String, IndexSet<i64>>,
    ) -> Result<()> {
        let mut specs = vec![];
        for class in self.registry.classes() {
            for (code, att) in &class.attributes {
                if !class.is_attribute_origin(code) {
                    continue;
                }
                let (column, target) = match &att.kind {
                    AttributeKind::ExternalKey {
                        target_class,
                        column,
                    } => (column.clone(), target_class.clone()),
                    AttributeKind::HierarchicalKey { column, .. } => {
                        (column.clone(), class.name.clone())
                    }
                    _ => continue,
                };
                if !self.registry.is_valid_class(&target) {
                    continue;
                }
                let storage = self.registry.storage_class(&class.name)?.to_string();
                let target_storage = self.registry.storage_class(&target)?.to_string();

                let mut lineage_tables = vec![];
                let mut lineage: Vec<String> = self
                    .registry
                    .parent_classes(&class.name)?
                    .to_vec();
                lineage.push(class.name.clone());
                for ancestor in &lineage {
                    if matches!(self.registry.has_table(ancestor), Ok(true)) {
                        lineage_tables.push((
                            self.registry.table(ancestor)?.to_string(),
                            self.registry.key_column(ancestor)?.to_string(),
                        ));
                    }
                }

                specs.push(KeySpec {
                    origin_class: class.name.clone(),
                    origin_root: class.root.clone(),
                    code: code.clone(),
                    table: self.registry.table(&storage)?.to_string(),
                    key_column: self.registry.key_column(&storage)?.to_string(),
                    column,
                    target_root: self.registry.root_class(&target)?.name.clone(),
                    target_table: self.registry.table(&target_storage)?.to_string(),
                    target_key: self.registry.key_column(&target_storage)?.to_string(),
                    nullable: att.null_allowed,
                    lineage_tables,
                });
            }
        }

        let mut rows_by_spec: Vec<Vec<(i64, i64)>> = vec![];
        let mut target_ids: IndexMap<String, IndexSet<i64>> = IndexMap::new();
        for spec in &specs {
            let pairs = self.fetch_column(&spec.table, &spec.key_column, &spec.column)?;
            rows_by_spec.push(
                pairs
                    .into_iter()
                    .filter_map(|(id, value)| value.as_i64().map(|key| (id, key)))
                    .collect(),
            );
            if !target_ids.contains_key(&spec.target_table) {
                let ids = self.fetch_ids(&spec.target_table, &spec.target_key)?;
                target_ids.insert(spec.target_table.clone(), ids);
            }
        }

        let mut flagged: IndexSet<(String, i64)> = IndexSet::new();
        loop {
            let mut changed = false;
            for (spec, rows) in specs.iter().zip(&rows_by_spec) {
                let live = &target_ids[&spec.target_table];
                for (id, key) in rows {
                    // 0 is the undefined reference, never dangling
                    if *key == 0 {
                        continue;
                    }
                    if flagged.contains(&(spec.table.clone(), *id)) {
                        continue;
                    }
                    let gone = deleted
                        .get(&spec.target_root)
                        .is_some_and(|ids| ids.contains(key));
                    if live.contains(key) && !gone {
                        continue;
                    }
                    changed = true;
                    flagged.insert((spec.table.clone(), *id));
                    if spec.nullable {
                        report.issues.push(IntegrityIssue {
                            root_class: spec.origin_root.clone(),
                            table: spec.table.clone(),
                            key_column: spec.key_column.clone(),
                            record_id: *id,
                            reason: format!(
                                "'{}' of class '{}' points at missing id {key}",
                                spec.code, spec.origin_class
                            ),
                            fix: ProposedFix::Update {
                                column: spec.column.clone(),
                                new_value: Value::Null,
                            },
                        });
                    } else {
                        for (table, key_column) in &spec.lineage_tables {
                            report.issues.push(IntegrityIssue {
                                root_class: spec.origin_root.clone(),
                                table: table.clone(),
                                key_column: key_column.clone(),
                                record_id: *id,
                                reason: format!(
                                    "'{}' of class '{}' points at missing id {key}",
                                    spec.code, spec.origin_class
                                ),
                                fix: ProposedFix::Delete,
                            });
                        }
                        deleted
                            .entry(spec.origin_root.clone())
                            .or_default()
                            .insert(*id);
                    }
                }
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }

    fn fetch_ids(&mut self, table: &str, key_column: &str) -> Result<IndexSet<i64>> {
        let sql = format!("SELECT `{key_column}` AS ID FROM `{table}`");
        let rows = self.conn.execute(&sql)?.into_rows()?;
        Ok(rows.iter().filter_map(|row| row.get_i64("ID")).collect())
    }

    fn fetch_column(
        &mut self,
        table: &str,
        key_column: &str,
        column: &str,
    ) -> Result<Vec<(i64, Value)>> {
        let sql = format!("SELECT `{key_column}` AS ID, `{column}` AS V FROM `{table}`");
        let rows = self.conn.execute(&sql)?.into_rows()?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let id = row.get_i64("ID")?;
                Some((id, row.get("V").cloned().unwrap_or(Value::Null)))
            })
            .collect())
    }
}
