mod context;
use context::BuildContext;

mod options;
pub use options::{ExtendedJoinSpec, OrderSpec, SelectOptions};

use crate::cache::QueryCache;
use crate::serializer::{Args, Renderer};
use crate::{JoinKind, JoinOn, SqlQuery};

use indexmap::{IndexMap, IndexSet};
use strata_core::driver::{Escaper, RelationGraph, Visibility, VisibilityFilter};
use strata_core::expr::{ExprColumn, Translation, UnresolvedFields};
use strata_core::registry::AttributeKind;
use strata_core::search::TreeOperator;
use strata_core::{Error, Expr, Registry, Result, Search, Value};

/// Compiles a [`Search`] into a joined single-table query tree and renders
/// it to SQL.
///
/// The compiler owns no connection: rendering needs an [`Escaper`], and the
/// optional collaborators supply visibility restrictions and relation
/// closures. Compiled structures are cached by signature and cloned out.
pub struct Compiler<'a> {
    registry: &'a Registry,
    cache: &'a QueryCache,
    escaper: &'a dyn Escaper,
    visibility: Option<&'a dyn Visibility>,
    relations: Option<&'a dyn RelationGraph>,
}

/// Mutable state of one compilation: the whole-search condition and
/// projection, rewritten in place as physical tables get bound.
struct Build {
    ctx: BuildContext,
    select: IndexMap<String, Expr>,
    condition: Expr,
    group_by: IndexMap<String, Expr>,
    columns_to_load: Option<IndexMap<String, Vec<String>>>,
}

impl Build {
    fn apply(&mut self, tr: &Translation) {
        if tr.is_empty() {
            return;
        }
        self.condition = self.condition.translate(tr);
        for expr in self.select.values_mut() {
            *expr = expr.translate(tr);
        }
        for expr in self.group_by.values_mut() {
            *expr = expr.translate(tr);
        }
    }

    fn unresolved(&self) -> UnresolvedFields {
        let mut out = UnresolvedFields::default();
        self.condition.unresolved_fields(&mut out);
        for expr in self.select.values() {
            expr.unresolved_fields(&mut out);
        }
        for expr in self.group_by.values() {
            expr.unresolved_fields(&mut out);
        }
        out
    }

    fn unresolved_codes(&self, alias: &str) -> Vec<String> {
        self.unresolved()
            .for_alias(alias)
            .map(|codes| codes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl<'a> Compiler<'a> {
    pub fn new(
        registry: &'a Registry,
        cache: &'a QueryCache,
        escaper: &'a dyn Escaper,
    ) -> Compiler<'a> {
        Compiler {
            registry,
            cache,
            escaper,
            visibility: None,
            relations: None,
        }
    }

    pub fn with_visibility(mut self, visibility: &'a dyn Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_relations(mut self, relations: &'a dyn RelationGraph) -> Self {
        self.relations = Some(relations);
        self
    }

    pub fn select_sql(
        &self,
        search: &Search,
        opts: &SelectOptions,
        args: &Args,
    ) -> Result<String> {
        // reject unknown sort attributes before compiling anything
        for spec in &opts.order_by {
            if spec.code != "id" && !self.registry.is_valid_attribute(&search.class, &spec.code) {
                return Err(Error::unknown_attribute(&search.class, &spec.code));
            }
        }
        // sort columns must be part of the load set
        let mut opts = opts.clone();
        if let Some(columns) = &mut opts.columns_to_load {
            let entry = columns.entry(search.alias.clone()).or_default();
            for spec in &opts.order_by {
                if spec.code != "id" && !entry.contains(&spec.code) {
                    entry.push(spec.code.clone());
                }
            }
        }

        let query = self.structure(search, &opts, &IndexMap::new())?;

        let mut order: Vec<(Expr, bool)> = vec![];
        for spec in &opts.order_by {
            for key in self.projection_keys(&search.class, &spec.code)? {
                let expr = query
                    .select
                    .get(&key)
                    .ok_or_else(|| Error::unknown_attribute(&search.class, &spec.code))?;
                order.push((expr.clone(), spec.ascending));
            }
        }

        Renderer::new(self.escaper, args).render_select(
            &query,
            &order,
            opts.limit,
            opts.offset,
            opts.count_only,
        )
    }

    pub fn delete_sql(&self, search: &Search, args: &Args) -> Result<String> {
        let search = self.filtered(search)?;
        let opts = SelectOptions {
            columns_to_load: Some(IndexMap::new()),
            ..Default::default()
        };
        let (query, _) = self.compile(&search, &opts, &IndexMap::new(), &[])?;
        Renderer::new(self.escaper, args).render_delete(&query)
    }

    pub fn update_sql(
        &self,
        search: &Search,
        values: &IndexMap<String, Value>,
        args: &Args,
    ) -> Result<String> {
        let search = self.filtered(search)?;
        let pinned: Vec<String> = values.keys().cloned().collect();
        let opts = SelectOptions {
            columns_to_load: Some(IndexMap::new()),
            ..Default::default()
        };
        let (mut query, chain) = self.compile(&search, &opts, &IndexMap::new(), &pinned)?;

        for (code, value) in values {
            let att = self.registry.attribute(&search.class, code)?;
            if !att.is_direct() {
                return Err(Error::definition(
                    &search.class,
                    format!("attribute '{code}' cannot be written"),
                ));
            }
            let column = att.first_column().ok_or_else(|| {
                Error::definition(&search.class, format!("attribute '{code}' has no column"))
            })?;
            let origin = self.registry.attribute_origin(&search.class, code)?;
            let storage = self.storage_class(origin)?;
            let node_alias = chain.get(&storage).ok_or_else(|| {
                Error::definition(&search.class, format!("table of '{code}' not joined"))
            })?;
            if let Some(node) = query.node_mut(node_alias) {
                node.update_values.insert(column, value.clone());
            }
        }

        Renderer::new(self.escaper, args).render_update(&query)
    }

    pub fn group_by_sql(
        &self,
        search: &Search,
        args: &Args,
        group_by: &IndexMap<String, Expr>,
        exclude_null_values: bool,
    ) -> Result<String> {
        let mut search = search.clone();
        if exclude_null_values {
            for expr in group_by.values() {
                search.add_condition(Expr::eq(
                    Expr::func("ISNULL", vec![expr.clone()]),
                    Expr::value(0i64),
                ));
            }
        }
        let opts = SelectOptions {
            columns_to_load: Some(IndexMap::new()),
            ..Default::default()
        };
        let query = self.structure(&search, &opts, group_by)?;
        Renderer::new(self.escaper, args).render_group_by(&query)
    }

    /// The compiled tree, for callers that reuse the structure.
    pub fn select_structure(&self, search: &Search, opts: &SelectOptions) -> Result<SqlQuery> {
        self.structure(search, opts, &IndexMap::new())
    }

    fn structure(
        &self,
        search: &Search,
        opts: &SelectOptions,
        group_by: &IndexMap<String, Expr>,
    ) -> Result<SqlQuery> {
        let search = self.filtered(search)?;
        let signature = self.signature(&search, opts, group_by);
        let mut query = match self.cache.get(&signature) {
            Some(hit) => hit,
            None => {
                let (query, _) = self.compile(&search, opts, group_by, &[])?;
                self.cache.put(&signature, &query);
                query
            }
        };
        // caller-specific data join; never part of the cached structure
        if let Some(ext) = &opts.extended_join {
            query.add_join(
                JoinKind::Left,
                SqlQuery::new(&ext.table, format!("{}_extdata", search.alias)),
                JoinOn::Key {
                    left_column: self.registry.key_column(&search.class)?.to_string(),
                    right_column: ext.join_key_column.clone(),
                    right_table_alias: None,
                },
            );
        }
        Ok(query)
    }

    /// Splices the visibility restriction into the search, once.
    fn filtered(&self, search: &Search) -> Result<Search> {
        let mut search = search.clone();
        if !search.allow_all_data && !search.data_filtered {
            if let Some(visibility) = self.visibility {
                match visibility.select_filter(&search.class, &search.modifier_props) {
                    VisibilityFilter::Unrestricted => {}
                    VisibilityFilter::DenyAll => search.add_condition(Expr::always_false()),
                    VisibilityFilter::Restrict(extra) => search.merge_with(extra)?,
                }
                search.data_filtered = true;
            }
        }
        Ok(search)
    }

    fn signature(
        &self,
        search: &Search,
        opts: &SelectOptions,
        group_by: &IndexMap<String, Expr>,
    ) -> String {
        let columns = match &opts.columns_to_load {
            None => "*".to_string(),
            Some(map) => map
                .iter()
                .map(|(alias, codes)| format!("{alias}:{}", codes.join(",")))
                .collect::<Vec<_>>()
                .join(";"),
        };
        let groups = group_by
            .iter()
            .map(|(name, expr)| format!("{name}={}", expr.render()))
            .collect::<Vec<_>>()
            .join(";");
        QueryCache::signature(&[
            &search.to_canonical(),
            &search.modifier_props.canonical(),
            &columns,
            &groups,
            if opts.count_only { "count" } else { "" },
        ])
    }

    fn compile(
        &self,
        search: &Search,
        opts: &SelectOptions,
        group_by: &IndexMap<String, Expr>,
        pinned: &[String],
    ) -> Result<(SqlQuery, IndexMap<String, String>)> {
        let mut b = Build {
            ctx: BuildContext::seed(&search.selected),
            select: IndexMap::new(),
            condition: search.condition.clone(),
            group_by: group_by.clone(),
            columns_to_load: opts.columns_to_load.clone(),
        };

        let (mut root, chain) = self.make_query(
            &mut b,
            Some(search),
            &search.class,
            &search.alias,
            true,
            pinned,
            None,
        )?;

        // every field must have been bound to a physical column by now
        let unresolved = b.unresolved();
        if let Some((alias, codes)) = unresolved.iter().next() {
            let class = search
                .selected
                .get(alias)
                .cloned()
                .unwrap_or_else(|| search.class.clone());
            let code = codes.keys().next().cloned().unwrap_or_default();
            return Err(Error::unknown_attribute(class, code));
        }

        root.select = std::mem::take(&mut b.select);
        if !b.condition.is_true() {
            root.condition = Some(b.condition);
        }
        root.group_by = std::mem::take(&mut b.group_by);
        root.source_canonical = search.to_canonical();
        Ok((root, chain))
    }

    /// One class alias becomes one inheritance-joined chain of single-table
    /// nodes plus the joins it fans out to. Returns the node and the map
    /// lineage class -> table alias.
    ///
    /// `anchor` picks which lineage table becomes the chain's root node; a
    /// caller joining on a column of a specific table sets it so the ON
    /// clause never references a table joined later. The lineage tables all
    /// share the key, so any of them can anchor the chain.
    #[allow(clippy::too_many_arguments)]
    fn make_query(
        &self,
        b: &mut Build,
        node: Option<&Search>,
        class: &str,
        alias: &str,
        is_queried: bool,
        pinned: &[String],
        anchor: Option<&str>,
    ) -> Result<(SqlQuery, IndexMap<String, String>)> {
        let host = self.registry.class(class)?;

        // 1. projection
        if is_queried {
            b.select
                .insert("id".to_string(), Expr::field(alias, "id"));
            let codes: Vec<String> = match &b.columns_to_load {
                None => host.attributes.keys().cloned().collect(),
                Some(map) => map.get(alias).cloned().unwrap_or_default(),
            };
            for code in codes {
                let att = self.registry.attribute(class, &code)?;
                if !att.is_scalar() {
                    continue;
                }
                match &att.kind {
                    AttributeKind::FriendlyName { key_attr } if key_attr == "id" => {
                        b.select.insert(
                            code.clone(),
                            self.registry.extended_name_expression(class, alias)?,
                        );
                    }
                    _ if att.is_direct() => {
                        for col in att.sql_columns() {
                            let name = format!("{code}{}", col.suffix);
                            b.select.insert(name.clone(), Expr::field(alias, name));
                        }
                    }
                    _ => {
                        b.select.insert(code.clone(), Expr::field(alias, code.clone()));
                    }
                }
            }
        }

        // 2. full-text needles over the plain scalar columns
        let needles: Vec<String> = node.map(|s| s.full_text.clone()).unwrap_or_default();
        if !needles.is_empty() {
            let mut haystack = vec![];
            for (code, att) in &host.attributes {
                if let AttributeKind::Scalar { .. } = &att.kind {
                    for col in att.sql_columns() {
                        haystack.push(Expr::field(alias, format!("{code}{}", col.suffix)));
                    }
                }
            }
            let haystack = Expr::concat_ws(" ", haystack);
            let mut condition = std::mem::replace(&mut b.condition, Expr::always_true());
            for needle in needles {
                condition = Expr::and(
                    condition,
                    Expr::like(haystack.clone(), Expr::value(format!("%{needle}%"))),
                );
            }
            b.condition = condition;
        }

        // 3. relation closures constrain the key up front
        if let Some(search_node) = node {
            for criterion in &search_node.related_to {
                let relations = self.relations.ok_or_else(|| {
                    Error::unknown_class(format!(
                        "relation '{}' (no relation collaborator configured)",
                        criterion.relation
                    ))
                })?;
                let by_class = relations.related_object_ids(
                    &criterion.search,
                    &criterion.relation,
                    criterion.max_depth,
                )?;
                let mut ids: Vec<Expr> = vec![];
                for (related_class, list) in &by_class {
                    let same_lineage = self.registry.is_valid_class(related_class)
                        && (self.registry.is_parent_class(related_class, class)?
                            || self.registry.is_parent_class(class, related_class)?);
                    if same_lineage {
                        ids.extend(list.iter().map(|id| Expr::from(*id)));
                    }
                }
                let condition = std::mem::replace(&mut b.condition, Expr::always_true());
                b.condition =
                    Expr::and(condition, Expr::in_list(Expr::field(alias, "id"), ids));
            }
        }

        // single-table inheritance: restrict shared rows to this branch
        if !host.has_table() {
            let concrete: Vec<String> = self
                .registry
                .child_classes_all(class)?
                .into_iter()
                .map(str::to_string)
                .collect();
            let condition = std::mem::replace(&mut b.condition, Expr::always_true());
            b.condition = Expr::and(
                condition,
                Expr::in_list(
                    Expr::field(alias, "finalclass"),
                    concrete.into_iter().map(Expr::value).collect(),
                ),
            );
        }

        // 4. the class's own friendly name expands in place
        let mut tr = Translation::default();
        for code in b.unresolved_codes(alias) {
            if let Some(att) = host.attributes.get(&code) {
                if matches!(&att.kind, AttributeKind::FriendlyName { key_attr } if key_attr == "id")
                {
                    tr.insert(
                        alias,
                        code,
                        self.registry.extended_name_expression(class, alias)?,
                    );
                }
            }
        }
        b.apply(&tr);

        // 5. which external keys and which lineage tables are required
        let mut needed_keys: IndexSet<String> = IndexSet::new();
        if let Some(search_node) = node {
            needed_keys.extend(search_node.pointing_to.keys().cloned());
        }
        let mut referenced: IndexSet<String> = b.unresolved_codes(alias).into_iter().collect();
        referenced.extend(pinned.iter().cloned());
        for code in referenced.clone() {
            if let Some(att) = host.attributes.get(&code) {
                if let Some(key) = att.key_attr() {
                    if key != "id" {
                        needed_keys.insert(key.to_string());
                    }
                }
            }
        }
        referenced.extend(needed_keys.iter().cloned());

        let mut lineage: Vec<String> = vec![class.to_string()];
        let parents = self.registry.parent_classes(class)?.to_vec();
        lineage.extend(parents.into_iter().rev());
        let main_class = lineage
            .iter()
            .find(|c| matches!(self.registry.has_table(c), Ok(true)))
            .cloned()
            .ok_or_else(|| Error::definition(class, "no table anywhere in the lineage"))?;

        let anchor_class = anchor.unwrap_or(main_class.as_str()).to_string();

        let mut required: IndexSet<String> = IndexSet::new();
        required.insert(main_class.clone());
        required.insert(anchor_class.clone());
        for code in &referenced {
            let Some(att) = host.attributes.get(code) else { continue };
            if !att.is_direct() {
                continue;
            }
            if let Some(origin) = host.attribute_origins.get(code) {
                required.insert(self.storage_class(origin)?);
            }
        }

        // 6. inheritance chain, the anchor table first
        let mut ordered: Vec<String> = vec![anchor_class.clone()];
        for lin in &lineage {
            if *lin == anchor_class || !required.contains(lin) {
                continue;
            }
            if !matches!(self.registry.has_table(lin), Ok(true)) {
                continue;
            }
            ordered.push(lin.clone());
        }

        let mut chain: IndexMap<String, String> = IndexMap::new();
        let mut root_node: Option<SqlQuery> = None;
        for lin in &ordered {
            let is_anchor = *lin == anchor_class;
            let table = self.registry.table(lin)?.to_string();
            let table_alias = if is_anchor {
                b.ctx.claim_table_alias(alias);
                alias.to_string()
            } else {
                b.ctx.generate_table_alias(&format!("{alias}_{lin}"))?
            };

            let mut tr = Translation::default();
            if is_anchor {
                tr.insert(
                    alias,
                    "id",
                    Expr::Column(ExprColumn::new(
                        &table_alias,
                        self.registry.key_column(lin)?,
                    )),
                );
            }
            for (code, att) in &host.attributes {
                if !att.is_direct() {
                    continue;
                }
                let Some(origin) = host.attribute_origins.get(code) else { continue };
                if self.storage_class(origin)? != *lin {
                    continue;
                }
                for col in att.sql_columns() {
                    tr.insert(
                        alias,
                        format!("{code}{}", col.suffix),
                        Expr::Column(ExprColumn::new(&table_alias, &col.column)),
                    );
                }
            }
            b.apply(&tr);

            chain.insert(lin.clone(), table_alias.clone());
            let query = SqlQuery::new(&table, &table_alias);
            match &mut root_node {
                None => root_node = Some(query),
                Some(root) => root.add_join(
                    JoinKind::Inner,
                    query,
                    JoinOn::Key {
                        left_column: self.registry.key_column(&anchor_class)?.to_string(),
                        right_column: self.registry.key_column(lin)?.to_string(),
                        right_table_alias: None,
                    },
                ),
            }
        }
        let mut root_node =
            root_node.ok_or_else(|| Error::definition(class, "no table anywhere in the lineage"))?;

        // 7. name attributes living in subclass tables outside the chain
        self.join_descendant_fields(b, &mut root_node, class, alias, &anchor_class)?;

        // 8. external keys: explicit joins, then implied joins for the
        //    computed attributes riding each key
        for key_code in needed_keys {
            self.join_external_key(
                b,
                &mut root_node,
                node,
                class,
                alias,
                &key_code,
                &chain,
            )?;
        }

        // 9. foreign searches joined back on my key
        if let Some(search_node) = node {
            for by_key in search_node.referenced_by.values() {
                for (foreign_key, sub) in by_key {
                    let fk = foreign_key.clone();
                    let fk_att = self.registry.attribute(&sub.class, &fk)?;
                    let fk_column = fk_att.first_column().ok_or_else(|| {
                        Error::definition(&sub.class, format!("external key '{fk}' has no column"))
                    })?;
                    let fk_origin = self.registry.attribute_origin(&sub.class, &fk)?;
                    let fk_storage = self.storage_class(fk_origin)?;
                    // anchor the sub chain on the key's table so the ON
                    // clause references nothing joined after it
                    let (sub_query, _) = self.make_query(
                        b,
                        Some(sub),
                        &sub.class,
                        &sub.alias,
                        false,
                        &[fk.clone()],
                        Some(fk_storage.as_str()),
                    )?;
                    root_node.add_join(
                        JoinKind::Inner,
                        sub_query,
                        JoinOn::Key {
                            left_column: self.registry.key_column(&anchor_class)?.to_string(),
                            right_column: fk_column,
                            right_table_alias: None,
                        },
                    );
                }
            }
        }

        if is_queried {
            root_node.selected_id_column = Some(ExprColumn::new(
                alias,
                self.registry.key_column(&anchor_class)?,
            ));
        }

        Ok((root_node, chain))
    }

    /// The extended name expression may reference attributes introduced by
    /// subclasses with their own tables; left-join those on the shared key.
    fn join_descendant_fields(
        &self,
        b: &mut Build,
        root_node: &mut SqlQuery,
        class: &str,
        alias: &str,
        anchor_class: &str,
    ) -> Result<()> {
        let host = self.registry.class(class)?;
        let mut fn_joins: IndexMap<String, String> = IndexMap::new();
        for code in b.unresolved_codes(alias) {
            if host.attributes.contains_key(&code) {
                continue;
            }
            let Some(descendant) = self
                .registry
                .child_classes(class)?
                .find(|d| self.registry.is_valid_attribute(d, &code))
                .map(str::to_string)
            else {
                continue;
            };
            let att = self.registry.attribute(&descendant, &code)?.clone();
            if !att.is_direct() {
                continue;
            }
            let origin = self.registry.attribute_origin(&descendant, &code)?;
            let storage = self.storage_class(origin)?;
            let join_alias = match fn_joins.get(&storage) {
                Some(existing) => existing.clone(),
                None => {
                    let join_alias =
                        b.ctx.generate_table_alias(&format!("{alias}_fn_{storage}"))?;
                    root_node.add_join(
                        JoinKind::Left,
                        SqlQuery::new(self.registry.table(&storage)?, &join_alias),
                        JoinOn::Key {
                            left_column: self.registry.key_column(anchor_class)?.to_string(),
                            right_column: self.registry.key_column(&storage)?.to_string(),
                            right_table_alias: None,
                        },
                    );
                    fn_joins.insert(storage.clone(), join_alias.clone());
                    join_alias
                }
            };
            let mut tr = Translation::default();
            for col in att.sql_columns() {
                tr.insert(
                    alias,
                    format!("{code}{}", col.suffix),
                    Expr::Column(ExprColumn::new(&join_alias, &col.column)),
                );
            }
            b.apply(&tr);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn join_external_key(
        &self,
        b: &mut Build,
        root_node: &mut SqlQuery,
        node: Option<&Search>,
        class: &str,
        alias: &str,
        key_code: &str,
        chain: &IndexMap<String, String>,
    ) -> Result<()> {
        let key_att = self.registry.attribute(class, key_code)?.clone();
        if !key_att.is_external_key() {
            return Err(Error::definition(
                class,
                format!("'{key_code}' is not an external key"),
            ));
        }
        let origin = self.registry.attribute_origin(class, key_code)?.to_string();
        let storage = self.storage_class(&origin)?;
        let left_alias = chain.get(&storage).cloned().ok_or_else(|| {
            Error::definition(class, format!("table of '{key_code}' not joined"))
        })?;
        let left_column = key_att.first_column().ok_or_else(|| {
            Error::definition(class, format!("external key '{key_code}' has no column"))
        })?;
        let target_class = key_att.target_class().unwrap_or(class).to_string();

        // explicit joins from the search
        if let Some(search_node) = node {
            if let Some(by_op) = search_node.pointing_to.get(key_code) {
                for (op, subs) in by_op {
                    for sub in subs {
                        match op {
                            TreeOperator::Equals => {
                                let (sub_query, _) = self.make_query(
                                    b,
                                    Some(sub),
                                    &sub.class,
                                    &sub.alias,
                                    false,
                                    &[],
                                    None,
                                )?;
                                let on = JoinOn::Key {
                                    left_column: left_column.clone(),
                                    right_column: self
                                        .registry
                                        .key_column(&sub.class)?
                                        .to_string(),
                                    right_table_alias: None,
                                };
                                Self::attach(root_node, &left_alias, JoinKind::Inner, sub_query, on);
                            }
                            _ => {
                                self.join_tree_operator(
                                    b,
                                    root_node,
                                    sub,
                                    *op,
                                    alias,
                                    &left_alias,
                                    &left_column,
                                    key_code,
                                    &target_class,
                                )?;
                            }
                        }
                    }
                }
            }
        }

        // implied join resolving the computed attributes riding the key
        let host = self.registry.class(class)?;
        let riding: Vec<(String, String)> = b
            .unresolved_codes(alias)
            .into_iter()
            .filter_map(|code| {
                let att = host.attributes.get(&code)?;
                match att.key_attr() {
                    Some(key) if key == key_code => {
                        let target_attr =
                            att.target_attr().unwrap_or("friendlyname").to_string();
                        Some((code, target_attr))
                    }
                    _ => None,
                }
            })
            .collect();
        if !riding.is_empty() {
            let target_alias = b
                .ctx
                .generate_class_alias(&format!("{alias}_{key_code}"), &target_class)?;
            let mut tr = Translation::default();
            for (code, target_attr) in &riding {
                tr.insert(alias, code.clone(), Expr::field(&target_alias, target_attr));
            }
            b.apply(&tr);
            let (sub_query, _) =
                self.make_query(b, None, &target_class, &target_alias, false, &[], None)?;
            let kind = if key_att.null_allowed {
                JoinKind::Left
            } else {
                JoinKind::Inner
            };
            let on = JoinOn::Key {
                left_column,
                right_column: self.registry.key_column(&target_class)?.to_string(),
                right_table_alias: None,
            };
            Self::attach(root_node, &left_alias, kind, sub_query, on);
        }
        Ok(())
    }

    /// A hierarchical operator joins through an intermediate range table:
    /// my key equals the walker's id, and the walker's nested-set interval
    /// sits inside (or around) the target's.
    #[allow(clippy::too_many_arguments)]
    fn join_tree_operator(
        &self,
        b: &mut Build,
        root_node: &mut SqlQuery,
        sub: &Search,
        op: TreeOperator,
        alias: &str,
        left_alias: &str,
        left_column: &str,
        key_code: &str,
        target_class: &str,
    ) -> Result<()> {
        let target = self.registry.class(target_class)?;
        let Some((hk_code, hk_att)) = target
            .attributes
            .iter()
            .find(|(_, att)| att.is_hierarchical_key())
        else {
            return Err(Error::definition(
                target_class,
                format!("'{key_code}' uses a tree operator but the class has no hierarchical key"),
            ));
        };
        let AttributeKind::HierarchicalKey {
            left_column: hk_left,
            right_column: hk_right,
            ..
        } = &hk_att.kind
        else {
            return Err(Error::definition(target_class, "malformed hierarchical key"));
        };
        let hk_left = hk_left.clone();
        let hk_right = hk_right.clone();
        let hk_origin = self.registry.attribute_origin(target_class, hk_code)?;
        let hk_storage = self.storage_class(hk_origin)?;
        let hk_table = self.registry.table(&hk_storage)?.to_string();

        let walker_alias = b
            .ctx
            .generate_table_alias(&format!("{alias}_{key_code}_tree"))?;
        let mut walker = SqlQuery::new(&hk_table, &walker_alias);

        let (sub_query, _) =
            self.make_query(b, Some(sub), &sub.class, &sub.alias, false, &[], None)?;
        walker.add_join(
            JoinKind::InnerTree(op),
            sub_query,
            JoinOn::TreeRange {
                outer_alias: walker_alias.clone(),
                left_column: hk_left,
                right_column: hk_right,
            },
        );
        let on = JoinOn::Key {
            left_column: left_column.to_string(),
            right_column: self.registry.key_column(target_class)?.to_string(),
            right_table_alias: None,
        };
        Self::attach(root_node, left_alias, JoinKind::Inner, walker, on);
        Ok(())
    }

    fn attach(
        root_node: &mut SqlQuery,
        left_alias: &str,
        kind: JoinKind,
        query: SqlQuery,
        on: JoinOn,
    ) {
        match root_node.node_mut(left_alias) {
            Some(node) => node.add_join(kind, query, on),
            None => root_node.add_join(kind, query, on),
        }
    }

    /// The select keys an attribute contributes to the projection.
    fn projection_keys(&self, class: &str, code: &str) -> Result<Vec<String>> {
        if code == "id" {
            return Ok(vec!["id".to_string()]);
        }
        let att = self.registry.attribute(class, code)?;
        let columns = att.sql_columns();
        if columns.is_empty() {
            return Ok(vec![code.to_string()]);
        }
        Ok(columns
            .into_iter()
            .map(|col| format!("{code}{}", col.suffix))
            .collect())
    }

    fn storage_class(&self, origin: &str) -> Result<String> {
        Ok(self.registry.storage_class(origin)?.to_string())
    }
}
