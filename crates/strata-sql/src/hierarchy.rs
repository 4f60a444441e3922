//! Nested-set maintenance for hierarchical keys.
//!
//! A hierarchical key stores, next to the parent id, a `left`/`right`
//! interval per row such that a descendant's interval sits strictly inside
//! its ancestor's. The compiler joins on those intervals; this module keeps
//! them consistent when rows are inserted, moved, or when the intervals
//! have to be recomputed from the parent ids alone.

use strata_core::driver::Connection;
use strata_core::registry::AttributeKind;
use strata_core::{Error, Registry, Result};

/// Row-level primitives the maintenance algorithms are written against.
/// The production implementation is [`SqlHierarchyStore`]; tests use an
/// in-memory table.
pub trait HierarchyStore {
    fn row_count(&mut self) -> Result<i64>;

    /// Largest `right` value in the table, 0 when empty. Parked rows carry
    /// negative values and never win.
    fn max_right(&mut self) -> Result<i64>;

    fn range_of(&mut self, id: i64) -> Result<Option<(i64, i64)>>;

    fn children_of(&mut self, parent: i64) -> Result<Vec<i64>>;

    fn set_range(&mut self, id: i64, left: i64, right: i64) -> Result<()>;

    /// Adds `delta` to every `left` at or above `threshold`.
    fn shift_lefts(&mut self, threshold: i64, delta: i64) -> Result<()>;

    /// Adds `delta` to every `right` at or above `threshold`.
    fn shift_rights(&mut self, threshold: i64, delta: i64) -> Result<()>;

    /// Parks the rows strictly inside `(left, right)`: both columns become
    /// `left - value`, which is negative and relative to the branch start,
    /// so the rows survive any amount of shifting around the gap.
    fn park_branch(&mut self, left: i64, right: i64) -> Result<()>;

    /// Restores parked rows at their new position: both columns become
    /// `new_left - value`.
    fn unpark_branch(&mut self, new_left: i64) -> Result<()>;
}

/// Opens a two-slot gap under `parent` and gives `id` that interval.
/// Parent 0 appends a new root after everything else.
pub fn insert_under<S>(store: &mut S, id: i64, parent: i64) -> Result<(i64, i64)>
where
    S: HierarchyStore + ?Sized,
{
    let (left, right) = if parent == 0 {
        let max = store.max_right()?;
        (max + 1, max + 2)
    } else {
        let (_, parent_right) = store
            .range_of(parent)?
            .ok_or_else(|| Error::integrity(format!("node {parent} has no interval")))?;
        store.shift_rights(parent_right, 2)?;
        store.shift_lefts(parent_right, 2)?;
        (parent_right, parent_right + 1)
    };
    store.set_range(id, left, right)?;
    Ok((left, right))
}

/// Parks the descendants of `id` at negative positions relative to the
/// branch start; the node's own row keeps its interval. Returns that
/// interval. The rest of the tree is untouched, so the caller may shift it
/// freely before replugging.
pub fn cut_branch<S>(store: &mut S, id: i64) -> Result<(i64, i64)>
where
    S: HierarchyStore + ?Sized,
{
    let (left, right) = store
        .range_of(id)?
        .ok_or_else(|| Error::integrity(format!("node {id} has no interval")))?;
    store.park_branch(left, right)?;
    Ok((left, right))
}

/// Restores a cut branch with `id`'s interval starting at `new_left`.
/// Replugging at the left the branch was cut from reproduces the original
/// coordinates.
pub fn replug_branch<S>(store: &mut S, id: i64, new_left: i64, width: i64) -> Result<()>
where
    S: HierarchyStore + ?Sized,
{
    store.set_range(id, new_left, new_left + width - 1)?;
    store.unpark_branch(new_left)
}

/// Moves the whole branch rooted at `id` under `new_parent` (0 makes it a
/// root): cut, close the old gap, open a gap at the new position, replug.
pub fn move_under<S>(store: &mut S, id: i64, new_parent: i64) -> Result<()>
where
    S: HierarchyStore + ?Sized,
{
    let (left, right) = store
        .range_of(id)?
        .ok_or_else(|| Error::integrity(format!("node {id} has no interval")))?;
    if new_parent != 0 {
        let (parent_left, parent_right) = store
            .range_of(new_parent)?
            .ok_or_else(|| Error::integrity(format!("node {new_parent} has no interval")))?;
        if parent_left >= left && parent_right <= right {
            return Err(Error::integrity(format!(
                "cannot move node {id} under its own descendant {new_parent}"
            )));
        }
    }
    let width = right - left + 1;

    cut_branch(store, id)?;
    // the node's own row leaves the tree until it lands at its new spot
    store.set_range(id, 0, 0)?;
    store.shift_lefts(right + 1, -width)?;
    store.shift_rights(right + 1, -width)?;

    let new_left = if new_parent == 0 {
        store.max_right()? + 1
    } else {
        // positions may have changed during compaction, fetch again
        let (_, parent_right) = store
            .range_of(new_parent)?
            .ok_or_else(|| Error::integrity(format!("node {new_parent} has no interval")))?;
        store.shift_rights(parent_right, width)?;
        store.shift_lefts(parent_right, width)?;
        parent_right
    };
    replug_branch(store, id, new_left, width)
}

/// Recomputes every interval from the parent ids alone, numbering a depth
/// first walk from the roots. This is the recovery path when the intervals
/// were never initialized or have been corrupted.
pub fn rebuild_from_parents<S>(store: &mut S) -> Result<()>
where
    S: HierarchyStore + ?Sized,
{
    let mut counter = 0;
    for root in store.children_of(0)? {
        assign(store, root, &mut counter)?;
    }
    Ok(())
}

fn assign<S>(store: &mut S, id: i64, counter: &mut i64) -> Result<()>
where
    S: HierarchyStore + ?Sized,
{
    *counter += 1;
    let left = *counter;
    for child in store.children_of(id)? {
        assign(store, child, counter)?;
    }
    *counter += 1;
    store.set_range(id, left, *counter)
}

/// True when the intervals cannot be trusted and a rebuild is needed. A
/// valid forest of N rows ends exactly at `right = 2 * N`.
pub fn diagnose<S>(store: &mut S) -> Result<bool>
where
    S: HierarchyStore + ?Sized,
{
    let rows = store.row_count()?;
    if rows == 0 {
        return Ok(false);
    }
    Ok(store.max_right()? != 2 * rows)
}

/// [`HierarchyStore`] over the physical table of one hierarchical key.
pub struct SqlHierarchyStore<'a> {
    conn: &'a mut dyn Connection,
    table: String,
    key_column: String,
    parent_column: String,
    left_column: String,
    right_column: String,
}

impl<'a> SqlHierarchyStore<'a> {
    pub fn for_attribute(
        conn: &'a mut dyn Connection,
        registry: &Registry,
        class: &str,
        code: &str,
    ) -> Result<SqlHierarchyStore<'a>> {
        let att = registry.attribute(class, code)?;
        let AttributeKind::HierarchicalKey {
            column,
            left_column,
            right_column,
        } = &att.kind
        else {
            return Err(Error::definition(
                class,
                format!("'{code}' is not a hierarchical key"),
            ));
        };
        let origin = registry.attribute_origin(class, code)?;
        let storage = registry.storage_class(origin)?.to_string();
        Ok(SqlHierarchyStore {
            conn,
            table: registry.table(&storage)?.to_string(),
            key_column: registry.key_column(&storage)?.to_string(),
            parent_column: column.clone(),
            left_column: left_column.clone(),
            right_column: right_column.clone(),
        })
    }

    pub fn table_exists(&mut self) -> Result<bool> {
        self.conn.table_exists(&self.table)
    }

    fn query_i64(&mut self, sql: String, column: &str) -> Result<Option<i64>> {
        let rows = self.conn.execute(&sql)?.into_rows()?;
        Ok(rows.first().and_then(|row| row.get_i64(column)))
    }
}

impl HierarchyStore for SqlHierarchyStore<'_> {
    fn row_count(&mut self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS COUNT FROM `{}`", self.table);
        self.query_i64(sql.clone(), "COUNT")?
            .ok_or_else(|| Error::storage(sql, "no row returned"))
    }

    fn max_right(&mut self) -> Result<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX(`{}`), 0) AS MAXRIGHT FROM `{}`",
            self.right_column, self.table
        );
        Ok(self.query_i64(sql, "MAXRIGHT")?.unwrap_or(0))
    }

    fn range_of(&mut self, id: i64) -> Result<Option<(i64, i64)>> {
        let sql = format!(
            "SELECT `{l}` AS L, `{r}` AS R FROM `{t}` WHERE `{k}` = {id}",
            l = self.left_column,
            r = self.right_column,
            t = self.table,
            k = self.key_column,
        );
        let rows = self.conn.execute(&sql)?.into_rows()?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        match (row.get_i64("L"), row.get_i64("R")) {
            (Some(left), Some(right)) => Ok(Some((left, right))),
            _ => Ok(None),
        }
    }

    fn children_of(&mut self, parent: i64) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT `{k}` AS ID FROM `{t}` WHERE `{p}` = {parent} ORDER BY `{k}`",
            k = self.key_column,
            t = self.table,
            p = self.parent_column,
        );
        let rows = self.conn.execute(&sql)?.into_rows()?;
        Ok(rows.iter().filter_map(|row| row.get_i64("ID")).collect())
    }

    fn set_range(&mut self, id: i64, left: i64, right: i64) -> Result<()> {
        let sql = format!(
            "UPDATE `{t}` SET `{l}` = {left}, `{r}` = {right} WHERE `{k}` = {id}",
            t = self.table,
            l = self.left_column,
            r = self.right_column,
            k = self.key_column,
        );
        self.conn.execute(&sql)?;
        Ok(())
    }

    fn shift_lefts(&mut self, threshold: i64, delta: i64) -> Result<()> {
        let sql = format!(
            "UPDATE `{t}` SET `{l}` = `{l}` + {delta} WHERE `{l}` >= {threshold}",
            t = self.table,
            l = self.left_column,
        );
        self.conn.execute(&sql)?;
        Ok(())
    }

    fn shift_rights(&mut self, threshold: i64, delta: i64) -> Result<()> {
        let sql = format!(
            "UPDATE `{t}` SET `{r}` = `{r}` + {delta} WHERE `{r}` >= {threshold}",
            t = self.table,
            r = self.right_column,
        );
        self.conn.execute(&sql)?;
        Ok(())
    }

    fn park_branch(&mut self, left: i64, right: i64) -> Result<()> {
        let sql = format!(
            "UPDATE `{t}` SET `{l}` = {left} - `{l}`, `{r}` = {left} - `{r}` \
             WHERE `{l}` > {left} AND `{r}` < {right}",
            t = self.table,
            l = self.left_column,
            r = self.right_column,
        );
        self.conn.execute(&sql)?;
        Ok(())
    }

    fn unpark_branch(&mut self, new_left: i64) -> Result<()> {
        let sql = format!(
            "UPDATE `{t}` SET `{l}` = {new_left} - `{l}`, `{r}` = {new_left} - `{r}` \
             WHERE `{l}` < 0",
            t = self.table,
            l = self.left_column,
            r = self.right_column,
        );
        self.conn.execute(&sql)?;
        Ok(())
    }
}

/// Outcome of sweeping one hierarchical key.
#[derive(Debug, Clone)]
pub struct HierarchyCheck {
    pub class: String,
    pub code: String,
    pub rebuild_needed: bool,
    pub rebuilt: bool,
}

/// Sweeps every hierarchical key declared in the registry, rebuilding the
/// intervals where they cannot be trusted. `diagnostics_only` reports
/// without touching the store; `force` rebuilds even healthy trees. Each
/// rebuild runs in its own transaction.
pub fn check_hierarchies(
    registry: &Registry,
    conn: &mut dyn Connection,
    diagnostics_only: bool,
    force: bool,
) -> Result<Vec<HierarchyCheck>> {
    let mut targets = vec![];
    for class in registry.classes() {
        for (code, att) in &class.attributes {
            if att.is_hierarchical_key() && class.is_attribute_origin(code) {
                targets.push((class.name.clone(), code.clone()));
            }
        }
    }

    let mut report = vec![];
    for (class, code) in targets {
        let needed = {
            let mut store = SqlHierarchyStore::for_attribute(conn, registry, &class, &code)?;
            if !store.table_exists()? {
                continue;
            }
            force || diagnose(&mut store)?
        };

        let mut rebuilt = false;
        if needed && !diagnostics_only {
            conn.execute("START TRANSACTION")?;
            let outcome = {
                let mut store = SqlHierarchyStore::for_attribute(conn, registry, &class, &code)?;
                rebuild_from_parents(&mut store)
            };
            match outcome {
                Ok(()) => {
                    conn.execute("COMMIT")?;
                    rebuilt = true;
                }
                Err(err) => {
                    conn.execute("ROLLBACK")?;
                    return Err(err);
                }
            }
        }

        report.push(HierarchyCheck {
            class,
            code,
            rebuild_needed: needed,
            rebuilt,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Default)]
    struct MemoryStore {
        // id -> (parent, left, right)
        rows: IndexMap<i64, (i64, i64, i64)>,
    }

    impl MemoryStore {
        fn add(&mut self, id: i64, parent: i64) {
            self.rows.insert(id, (parent, 0, 0));
        }

        fn range(&self, id: i64) -> (i64, i64) {
            let (_, left, right) = self.rows[&id];
            (left, right)
        }
    }

    impl HierarchyStore for MemoryStore {
        fn row_count(&mut self) -> Result<i64> {
            Ok(self.rows.len() as i64)
        }

        fn max_right(&mut self) -> Result<i64> {
            Ok(self.rows.values().map(|(_, _, r)| *r).max().unwrap_or(0))
        }

        fn range_of(&mut self, id: i64) -> Result<Option<(i64, i64)>> {
            Ok(self.rows.get(&id).map(|(_, l, r)| (*l, *r)))
        }

        fn children_of(&mut self, parent: i64) -> Result<Vec<i64>> {
            Ok(self
                .rows
                .iter()
                .filter(|(_, (p, _, _))| *p == parent)
                .map(|(id, _)| *id)
                .collect())
        }

        fn set_range(&mut self, id: i64, left: i64, right: i64) -> Result<()> {
            if let Some(row) = self.rows.get_mut(&id) {
                row.1 = left;
                row.2 = right;
            }
            Ok(())
        }

        fn shift_lefts(&mut self, threshold: i64, delta: i64) -> Result<()> {
            for row in self.rows.values_mut() {
                if row.1 >= threshold {
                    row.1 += delta;
                }
            }
            Ok(())
        }

        fn shift_rights(&mut self, threshold: i64, delta: i64) -> Result<()> {
            for row in self.rows.values_mut() {
                if row.2 >= threshold {
                    row.2 += delta;
                }
            }
            Ok(())
        }

        fn park_branch(&mut self, left: i64, right: i64) -> Result<()> {
            for row in self.rows.values_mut() {
                if row.1 > left && row.2 < right {
                    row.1 = left - row.1;
                    row.2 = left - row.2;
                }
            }
            Ok(())
        }

        fn unpark_branch(&mut self, new_left: i64) -> Result<()> {
            for row in self.rows.values_mut() {
                if row.1 < 0 {
                    row.1 = new_left - row.1;
                    row.2 = new_left - row.2;
                }
            }
            Ok(())
        }
    }

    fn valid_forest(store: &mut MemoryStore) -> bool {
        let rows = store.rows.clone();
        // every interval is well formed and nested inside its parent
        for (id, (parent, left, right)) in &rows {
            if left >= right || *left <= 0 {
                return false;
            }
            if *parent != 0 {
                let Some((_, pl, pr)) = rows.get(parent) else {
                    return false;
                };
                if !(pl < left && right < pr) {
                    return false;
                }
            }
            let _ = id;
        }
        // intervals use each integer 1..=2N exactly once
        let mut bounds: Vec<i64> = rows.values().flat_map(|(_, l, r)| [*l, *r]).collect();
        bounds.sort_unstable();
        bounds == (1..=2 * rows.len() as i64).collect::<Vec<_>>()
    }

    #[test]
    fn insert_builds_a_valid_tree() {
        let mut store = MemoryStore::default();
        store.add(1, 0);
        insert_under(&mut store, 1, 0).unwrap();
        assert_eq!(store.range(1), (1, 2));

        store.add(2, 1);
        insert_under(&mut store, 2, 1).unwrap();
        assert_eq!(store.range(1), (1, 4));
        assert_eq!(store.range(2), (2, 3));

        store.add(3, 1);
        insert_under(&mut store, 3, 1).unwrap();
        assert_eq!(store.range(1), (1, 6));
        assert_eq!(store.range(2), (2, 3));
        assert_eq!(store.range(3), (4, 5));

        store.add(4, 2);
        insert_under(&mut store, 4, 2).unwrap();
        assert!(valid_forest(&mut store));
        // the new grandchild sits inside node 2
        assert_eq!(store.range(2), (2, 5));
        assert_eq!(store.range(4), (3, 4));
    }

    #[test]
    fn second_root_appends_after_the_first() {
        let mut store = MemoryStore::default();
        store.add(1, 0);
        insert_under(&mut store, 1, 0).unwrap();
        store.add(2, 1);
        insert_under(&mut store, 2, 1).unwrap();

        store.add(3, 0);
        insert_under(&mut store, 3, 0).unwrap();
        assert_eq!(store.range(3), (5, 6));
        assert!(valid_forest(&mut store));
    }

    fn fan_out_two_depth_three() -> MemoryStore {
        // 1 -> (2, 3); 2 -> (4, 5); 3 -> (6, 7)
        let mut store = MemoryStore::default();
        let edges = [(1, 0), (2, 1), (3, 1), (4, 2), (5, 2), (6, 3), (7, 3)];
        for (id, parent) in edges {
            store.add(id, parent);
        }
        rebuild_from_parents(&mut store).unwrap();
        store
    }

    #[test]
    fn rebuild_numbers_a_depth_first_walk() {
        let mut store = fan_out_two_depth_three();
        assert!(valid_forest(&mut store));
        assert_eq!(store.range(1), (1, 14));
        assert_eq!(store.range(2), (2, 7));
        assert_eq!(store.range(4), (3, 4));
        assert_eq!(store.range(5), (5, 6));
        assert_eq!(store.range(3), (8, 13));
        assert!(!diagnose(&mut store).unwrap());
    }

    #[test]
    fn move_relocates_the_whole_branch() {
        let mut store = fan_out_two_depth_three();
        // move node 2 (with children 4 and 5) under node 3
        store.rows.get_mut(&2).unwrap().0 = 3;
        move_under(&mut store, 2, 3).unwrap();

        assert!(valid_forest(&mut store));
        let (l2, r2) = store.range(2);
        let (l3, r3) = store.range(3);
        assert!(l3 < l2 && r2 < r3);
        let (l4, r4) = store.range(4);
        assert!(l2 < l4 && r4 < r2);
        assert_eq!(r2 - l2, 5);
    }

    #[test]
    fn move_to_root_detaches_the_branch() {
        let mut store = fan_out_two_depth_three();
        store.rows.get_mut(&3).unwrap().0 = 0;
        move_under(&mut store, 3, 0).unwrap();

        assert!(valid_forest(&mut store));
        assert_eq!(store.range(1), (1, 8));
        let (l3, r3) = store.range(3);
        assert_eq!((l3, r3), (9, 14));
    }

    #[test]
    fn cut_and_replug_restore_the_coordinates() {
        let mut store = fan_out_two_depth_three();
        let before = store.rows.clone();

        let (left, right) = cut_branch(&mut store, 2).unwrap();
        assert_eq!((left, right), (2, 7));
        // descendants sit out of the positive range while cut
        let (l4, r4) = store.range(4);
        assert!(l4 < 0 && r4 < 0);
        // the rest of the tree is untouched
        assert_eq!(store.range(1), (1, 14));
        assert_eq!(store.range(3), (8, 13));

        replug_branch(&mut store, 2, left, right - left + 1).unwrap();
        assert_eq!(store.rows, before);
        assert!(valid_forest(&mut store));
    }

    #[test]
    fn moving_under_a_descendant_is_rejected() {
        let mut store = fan_out_two_depth_three();
        let err = move_under(&mut store, 2, 4).unwrap_err();
        assert!(err.to_string().contains("descendant"));
        assert!(valid_forest(&mut store));
    }

    #[test]
    fn diagnose_flags_uninitialized_intervals() {
        let mut store = MemoryStore::default();
        store.add(1, 0);
        store.add(2, 1);
        assert!(diagnose(&mut store).unwrap());
        rebuild_from_parents(&mut store).unwrap();
        assert!(!diagnose(&mut store).unwrap());
    }
}
