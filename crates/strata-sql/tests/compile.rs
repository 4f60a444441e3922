use indexmap::IndexMap;
use strata_core::driver::{StdEscaper, Visibility, VisibilityFilter};
use strata_core::registry::{Attribute, ClassSpec, NameSpec};
use strata_core::search::{ModifierProperties, TreeOperator};
use strata_core::{Expr, Registry, Search, Value};
use strata_sql::{
    Args, Compiler, ExtendedJoinSpec, JoinKind, JoinOn, OrderSpec, QueryCache, SelectOptions,
    SqlQuery,
};

use pretty_assertions::assert_eq;

/// Organizations form a tree; contacts split into persons (own table),
/// teams (rows in the root table) and suppliers.
fn model() -> Registry {
    let mut b = Registry::builder();

    b.declare(
        ClassSpec::new("Organization")
            .table("organization")
            .name_spec(NameSpec::attribute("name")),
    )
    .unwrap();
    b.add_attribute("Organization", Attribute::scalar("name", "name"))
        .unwrap();
    b.add_attribute(
        "Organization",
        Attribute::hierarchical_key("parent_id", "parent_id", "parent_left", "parent_right"),
    )
    .unwrap();

    b.declare(
        ClassSpec::new("Contact")
            .table("contact")
            .abstract_class()
            .name_spec(NameSpec::attribute("name")),
    )
    .unwrap();
    b.add_attribute("Contact", Attribute::scalar("name", "name"))
        .unwrap();
    b.add_attribute(
        "Contact",
        Attribute::external_key("org_id", "org_id", "Organization"),
    )
    .unwrap();
    b.add_attribute(
        "Contact",
        Attribute::external_field("org_name", "org_id", "name"),
    )
    .unwrap();
    b.add_attribute(
        "Contact",
        Attribute::scalar("status", "status")
            .with_allowed_values(["active", "inactive"])
            .with_default("active"),
    )
    .unwrap();

    b.declare(
        ClassSpec::new("Person")
            .table("person")
            .name_spec(NameSpec::attributes(["first_name", "name"])),
    )
    .unwrap();
    b.inherit("Person", "Contact").unwrap();
    b.add_attribute("Person", Attribute::scalar("first_name", "first_name"))
        .unwrap();
    b.add_attribute(
        "Person",
        Attribute::external_key("manager_id", "manager_id", "Person").allow_null(true),
    )
    .unwrap();

    b.declare(ClassSpec::new("Team").name_spec(NameSpec::attribute("name")))
        .unwrap();
    b.inherit("Team", "Contact").unwrap();

    b.declare(
        ClassSpec::new("Supplier")
            .table("supplier")
            .name_spec(NameSpec::attribute("name")),
    )
    .unwrap();
    b.inherit("Supplier", "Contact").unwrap();

    b.build().unwrap()
}

fn columns(alias: &str, codes: &[&str]) -> Option<IndexMap<String, Vec<String>>> {
    let mut map = IndexMap::new();
    map.insert(
        alias.to_string(),
        codes.iter().map(|c| c.to_string()).collect(),
    );
    Some(map)
}

fn select(registry: &Registry, search: &Search, opts: &SelectOptions) -> String {
    let cache = QueryCache::new();
    Compiler::new(registry, &cache, &StdEscaper)
        .select_sql(search, opts, &Args::new())
        .unwrap()
}

#[test]
fn plain_select_projects_every_scalar() {
    let registry = model();
    let search = Search::new("Organization");

    let sql = select(&registry, &search, &SelectOptions::default());
    assert_eq!(
        sql,
        "SELECT `Organization`.`id` AS `id`, \
         `Organization`.`name` AS `name`, \
         `Organization`.`parent_id` AS `parent_id`, \
         `Organization`.`parent_left` AS `parent_id_left`, \
         `Organization`.`parent_right` AS `parent_id_right`, \
         `Organization`.`name` AS `friendlyname`, \
         `Organization_parent_id`.`name` AS `parent_id_friendlyname` \
         FROM `organization` AS `Organization` \
         LEFT JOIN `organization` AS `Organization_parent_id` \
         ON `Organization`.`parent_id` = `Organization_parent_id`.`id`"
    );
}

#[test]
fn inheritance_chain_joins_the_ancestor_table() {
    let registry = model();
    let mut search = Search::new("Person");
    search.add_condition(Expr::eq(
        Expr::field("Person", "status"),
        Expr::value("active"),
    ));
    let opts = SelectOptions {
        columns_to_load: columns("Person", &["name", "first_name"]),
        order_by: vec![OrderSpec::asc("name")],
        limit: Some(10),
        offset: Some(5),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id`, \
         `Person_Contact`.`name` AS `name`, \
         `Person`.`first_name` AS `first_name` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         WHERE (`Person_Contact`.`status` = 'active') \
         ORDER BY `Person_Contact`.`name` ASC \
         LIMIT 10 OFFSET 5"
    );
}

#[test]
fn sort_columns_are_pulled_into_the_load_set() {
    let registry = model();
    let search = Search::new("Person");
    let opts = SelectOptions {
        columns_to_load: columns("Person", &["name"]),
        order_by: vec![OrderSpec::desc("first_name")],
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id`, \
         `Person_Contact`.`name` AS `name`, \
         `Person`.`first_name` AS `first_name` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         ORDER BY `Person`.`first_name` DESC"
    );
}

#[test]
fn single_table_class_restricts_on_the_discriminator() {
    let registry = model();
    let search = Search::new("Team");
    let opts = SelectOptions {
        columns_to_load: columns("Team", &["name"]),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Team`.`id` AS `id`, `Team`.`name` AS `name` \
         FROM `contact` AS `Team` \
         WHERE (`Team`.`finalclass` IN ('Team'))"
    );
}

#[test]
fn friendly_name_branches_join_the_subclass_table() {
    let registry = model();
    let search = Search::new("Contact");
    let opts = SelectOptions {
        columns_to_load: columns("Contact", &["friendlyname"]),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Contact`.`id` AS `id`, \
         IF((`Contact`.`finalclass` IN ('Team', 'Supplier')), `Contact`.`name`, \
         CONCAT_WS('', `Contact_fn_Person`.`first_name`, ' ', `Contact`.`name`)) AS `friendlyname` \
         FROM `contact` AS `Contact` \
         LEFT JOIN `person` AS `Contact_fn_Person` ON `Contact`.`id` = `Contact_fn_Person`.`id`"
    );
}

#[test]
fn external_field_rides_an_implied_join() {
    let registry = model();
    let search = Search::new("Person");
    let opts = SelectOptions {
        columns_to_load: columns("Person", &["org_name"]),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id`, `Person_org_id`.`name` AS `org_name` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         INNER JOIN `organization` AS `Person_org_id` ON `Person_Contact`.`org_id` = `Person_org_id`.`id`"
    );
}

#[test]
fn nullable_key_turns_the_implied_join_left() {
    let registry = model();
    let search = Search::new("Person");
    let opts = SelectOptions {
        columns_to_load: columns("Person", &["manager_id_friendlyname"]),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id`, \
         CONCAT_WS('', `Person_manager_id`.`first_name`, ' ', `Person_manager_id_Contact`.`name`) \
         AS `manager_id_friendlyname` \
         FROM `person` AS `Person` \
         LEFT JOIN `person` AS `Person_manager_id` ON `Person`.`manager_id` = `Person_manager_id`.`id` \
         INNER JOIN `contact` AS `Person_manager_id_Contact` \
         ON `Person_manager_id`.`id` = `Person_manager_id_Contact`.`id`"
    );
}

#[test]
fn explicit_join_lands_on_the_key_owning_table() {
    let registry = model();
    let mut org = Search::new("Organization");
    org.add_condition(Expr::eq(
        Expr::field("Organization", "name"),
        Expr::value("Demo"),
    ));
    let mut search = Search::new("Person");
    search
        .join_pointing_to("org_id", TreeOperator::Equals, org)
        .unwrap();
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         INNER JOIN `organization` AS `Organization` ON `Person_Contact`.`org_id` = `Organization`.`id` \
         WHERE (`Organization`.`name` = 'Demo')"
    );
}

#[test]
fn tree_operator_joins_through_a_range_walker() {
    let registry = model();
    let mut below = Search::new("Organization");
    below.add_condition(Expr::eq(
        Expr::field("Organization", "name"),
        Expr::value("Demo"),
    ));
    let mut search = Search::new("Person");
    search
        .join_pointing_to("org_id", TreeOperator::Below, below)
        .unwrap();
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         INNER JOIN `organization` AS `Person_org_id_tree` \
         ON `Person_Contact`.`org_id` = `Person_org_id_tree`.`id` \
         INNER JOIN `organization` AS `Organization` \
         ON `Person_org_id_tree`.`parent_left` >= `Organization`.`parent_left` \
         AND `Person_org_id_tree`.`parent_right` <= `Organization`.`parent_right` \
         WHERE (`Organization`.`name` = 'Demo')"
    );
}

#[test]
fn referenced_by_joins_back_on_my_key() {
    let registry = model();
    let mut search = Search::new("Organization");
    search
        .join_referenced_by("org_id", Search::new("Person"))
        .unwrap();
    let opts = SelectOptions {
        columns_to_load: columns("Organization", &[]),
        ..Default::default()
    };

    // the foreign chain is anchored on the table carrying the key, so the
    // ON clause never references a table joined after it
    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Organization`.`id` AS `id` \
         FROM `organization` AS `Organization` \
         INNER JOIN `contact` AS `Person` ON `Organization`.`id` = `Person`.`org_id` \
         INNER JOIN `person` AS `Person_Person` ON `Person`.`id` = `Person_Person`.`id`"
    );
}

#[test]
fn full_text_needles_are_all_required() {
    let registry = model();
    let mut search = Search::new("Person");
    search.add_full_text("alpha");
    search.add_full_text("beta");
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         WHERE (CONCAT_WS(' ', `Person_Contact`.`name`, `Person_Contact`.`status`, \
         `Person`.`first_name`) LIKE '%alpha%') \
         AND (CONCAT_WS(' ', `Person_Contact`.`name`, `Person_Contact`.`status`, \
         `Person`.`first_name`) LIKE '%beta%')"
    );
}

#[test]
fn count_only_counts_distinct_ids() {
    let registry = model();
    let search = Search::new("Person");
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        count_only: true,
        ..Default::default()
    };

    let sql = select(&registry, &search, &opts);
    assert_eq!(
        sql,
        "SELECT COUNT(DISTINCT `Person`.`id`) AS COUNT FROM `person` AS `Person`"
    );
}

#[test]
fn update_spreads_assignments_across_the_chain() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let mut search = Search::new("Person");
    search.add_condition(Expr::eq(Expr::field("Person", "id"), Expr::value(7i64)));
    let mut values = IndexMap::new();
    values.insert("first_name".to_string(), Value::from("X"));
    values.insert("status".to_string(), Value::from("inactive"));

    let sql = compiler.update_sql(&search, &values, &Args::new()).unwrap();
    assert_eq!(
        sql,
        "UPDATE `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         SET `Person`.`first_name` = 'X', `Person_Contact`.`status` = 'inactive' \
         WHERE (`Person`.`id` = 7)"
    );
}

#[test]
fn computed_attributes_cannot_be_written() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let search = Search::new("Person");
    let mut values = IndexMap::new();
    values.insert("org_name".to_string(), Value::from("Demo"));

    let err = compiler
        .update_sql(&search, &values, &Args::new())
        .unwrap_err();
    assert!(err.is_definition());
    assert!(err.to_string().contains("cannot be written"));
}

#[test]
fn delete_targets_the_root_alias() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let sql = compiler
        .delete_sql(&Search::new("Team"), &Args::new())
        .unwrap();
    assert_eq!(
        sql,
        "DELETE `Team` FROM `contact` AS `Team` WHERE (`Team`.`finalclass` IN ('Team'))"
    );
}

#[test]
fn group_by_projects_the_group_expressions() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let search = Search::new("Contact");
    let mut groups = IndexMap::new();
    groups.insert("status".to_string(), Expr::field("Contact", "status"));

    let sql = compiler
        .group_by_sql(&search, &Args::new(), &groups, true)
        .unwrap();
    assert_eq!(
        sql,
        "SELECT `Contact`.`status` AS `status`, COUNT(*) AS _count_ \
         FROM `contact` AS `Contact` \
         WHERE (ISNULL(`Contact`.`status`) = 0) \
         GROUP BY `Contact`.`status`"
    );
}

#[test]
fn unknown_sort_code_is_rejected() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let opts = SelectOptions {
        order_by: vec![OrderSpec::asc("shoe_size")],
        ..Default::default()
    };
    let err = compiler
        .select_sql(&Search::new("Person"), &opts, &Args::new())
        .unwrap_err();
    assert!(err.is_unknown_code());
}

#[test]
fn unresolved_attribute_is_rejected() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let mut search = Search::new("Person");
    search.add_condition(Expr::eq(Expr::field("Person", "nope"), Expr::value(1i64)));
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };

    let err = compiler
        .select_sql(&search, &opts, &Args::new())
        .unwrap_err();
    assert!(err.is_unknown_code());
}

#[test]
fn missing_argument_names_the_query() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let mut search = Search::new("Person");
    search.add_condition(Expr::eq(Expr::field("Person", "name"), Expr::arg("who")));
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };

    let err = compiler
        .select_sql(&search, &opts, &Args::new())
        .unwrap_err();
    assert!(err.is_missing_argument());
    assert_eq!(
        err.to_string(),
        "missing query argument 'who' in: SELECT Person WHERE (`Person`.`name` = :who)"
    );
}

#[test]
fn supplied_argument_is_quoted_in_place() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let mut search = Search::new("Person");
    search.add_condition(Expr::eq(Expr::field("Person", "name"), Expr::arg("who")));
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };
    let mut args = Args::new();
    args.set("who", "O'Hara");

    let sql = compiler.select_sql(&search, &opts, &args).unwrap();
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         WHERE (`Person_Contact`.`name` = 'O''Hara')"
    );
}

struct NoAccess;

impl Visibility for NoAccess {
    fn select_filter(&self, _class: &str, _props: &ModifierProperties) -> VisibilityFilter {
        VisibilityFilter::DenyAll
    }
}

struct ActiveOnly;

impl Visibility for ActiveOnly {
    fn select_filter(&self, class: &str, _props: &ModifierProperties) -> VisibilityFilter {
        let mut restriction = Search::new(class);
        restriction.add_condition(Expr::eq(
            Expr::field(class, "status"),
            Expr::value("active"),
        ));
        VisibilityFilter::Restrict(restriction)
    }
}

#[test]
fn deny_all_compiles_to_an_always_false_condition() {
    let registry = model();
    let cache = QueryCache::new();
    let visibility = NoAccess;
    let compiler = Compiler::new(&registry, &cache, &StdEscaper).with_visibility(&visibility);

    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };
    let sql = compiler
        .select_sql(&Search::new("Person"), &opts, &Args::new())
        .unwrap();
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id` FROM `person` AS `Person` WHERE 0"
    );
}

#[test]
fn visibility_restriction_is_spliced_in_once() {
    let registry = model();
    let cache = QueryCache::new();
    let visibility = ActiveOnly;
    let compiler = Compiler::new(&registry, &cache, &StdEscaper).with_visibility(&visibility);

    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };
    let sql = compiler
        .select_sql(&Search::new("Person"), &opts, &Args::new())
        .unwrap();
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id` \
         FROM `person` AS `Person` \
         INNER JOIN `contact` AS `Person_Contact` ON `Person`.`id` = `Person_Contact`.`id` \
         WHERE (`Person_Contact`.`status` = 'active')"
    );
}

#[test]
fn opted_out_search_skips_the_visibility_filter() {
    let registry = model();
    let cache = QueryCache::new();
    let visibility = NoAccess;
    let compiler = Compiler::new(&registry, &cache, &StdEscaper).with_visibility(&visibility);

    let mut search = Search::new("Person");
    search.allow_all_data = true;
    let opts = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };
    let sql = compiler.select_sql(&search, &opts, &Args::new()).unwrap();
    assert_eq!(sql, "SELECT `Person`.`id` AS `id` FROM `person` AS `Person`");
}

#[test]
fn repeated_compiles_hit_the_cache() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let search = Search::new("Person");
    let opts = SelectOptions {
        columns_to_load: columns("Person", &["name"]),
        ..Default::default()
    };
    compiler.select_sql(&search, &opts, &Args::new()).unwrap();
    compiler.select_sql(&search, &opts, &Args::new()).unwrap();
    assert_eq!(cache.len(), 1);

    // a different projection compiles to a different structure
    let counted = SelectOptions {
        columns_to_load: columns("Person", &["name"]),
        count_only: true,
        ..Default::default()
    };
    compiler.select_sql(&search, &counted, &Args::new()).unwrap();
    assert_eq!(cache.len(), 2);
}

#[test]
fn extended_join_is_attached_after_the_cache() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let search = Search::new("Person");
    let plain = SelectOptions {
        columns_to_load: columns("Person", &[]),
        ..Default::default()
    };
    let extended = SelectOptions {
        extended_join: Some(ExtendedJoinSpec {
            table: "sync_data".to_string(),
            join_key_column: "obj_id".to_string(),
        }),
        ..plain.clone()
    };

    let sql = compiler.select_sql(&search, &plain, &Args::new()).unwrap();
    assert_eq!(sql, "SELECT `Person`.`id` AS `id` FROM `person` AS `Person`");

    // same signature, but the caller-specific join still lands
    let sql = compiler
        .select_sql(&search, &extended, &Args::new())
        .unwrap();
    assert_eq!(
        sql,
        "SELECT `Person`.`id` AS `id` \
         FROM `person` AS `Person` \
         LEFT JOIN `sync_data` AS `Person_extdata` ON `Person`.`id` = `Person_extdata`.`obj_id`"
    );

    // and never leaks into the shared structure
    let sql = compiler.select_sql(&search, &plain, &Args::new()).unwrap();
    assert_eq!(sql, "SELECT `Person`.`id` AS `id` FROM `person` AS `Person`");
    assert_eq!(cache.len(), 1);
}

#[test]
fn cached_structures_are_isolated_clones() {
    let registry = model();
    let cache = QueryCache::new();
    let compiler = Compiler::new(&registry, &cache, &StdEscaper);

    let search = Search::new("Person");
    let opts = SelectOptions {
        columns_to_load: columns("Person", &["name"]),
        ..Default::default()
    };

    let first = compiler.select_structure(&search, &opts).unwrap();
    let mut second = compiler.select_structure(&search, &opts).unwrap();
    second.select.clear();
    second.add_join(
        JoinKind::Left,
        SqlQuery::new("sync_data", "Extra"),
        JoinOn::Key {
            left_column: "id".to_string(),
            right_column: "obj_id".to_string(),
            right_table_alias: None,
        },
    );

    let third = compiler.select_structure(&search, &opts).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(third.joins().len(), first.joins().len());
    assert_eq!(
        third.select().keys().collect::<Vec<_>>(),
        first.select().keys().collect::<Vec<_>>()
    );
}

#[test]
fn signatures_are_deterministic_and_separator_safe() {
    assert_eq!(
        QueryCache::signature(&["a", "b"]),
        QueryCache::signature(&["a", "b"])
    );
    assert_ne!(
        QueryCache::signature(&["a", "b"]),
        QueryCache::signature(&["ab", ""])
    );
}
