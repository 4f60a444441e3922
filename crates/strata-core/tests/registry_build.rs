use strata_core::registry::{Attribute, AttributeKind, ClassSpec, NameSpec};
use strata_core::Registry;

use pretty_assertions::assert_eq;

/// A small service-management model: organizations form a tree, contacts
/// split into persons (own table), teams (stored in the root table) and
/// suppliers.
fn model() -> Registry {
    let mut b = Registry::builder();

    b.declare(
        ClassSpec::new("Organization")
            .table("organization")
            .category("bizmodel")
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
            .category("bizmodel")
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
        Attribute::external_field("org_parent_id", "org_id", "parent_id"),
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

#[test]
fn lineage_bookkeeping() {
    let registry = model();

    assert_eq!(registry.parent_classes("Person").unwrap(), ["Contact"]);
    assert_eq!(registry.root_class("Person").unwrap().name, "Contact");
    assert!(registry.is_parent_class("Contact", "Team").unwrap());
    assert!(!registry.is_parent_class("Person", "Team").unwrap());
    assert_eq!(
        registry.child_classes_all("Contact").unwrap(),
        ["Contact", "Person", "Team", "Supplier"]
    );
    assert!(registry.is_standalone("Organization").unwrap());
    assert!(!registry.is_standalone("Contact").unwrap());
}

#[test]
fn storage_falls_back_to_the_nearest_ancestor_table() {
    let registry = model();

    assert!(!registry.has_table("Team").unwrap());
    assert_eq!(registry.storage_class("Team").unwrap(), "Contact");
    assert_eq!(registry.storage_class("Person").unwrap(), "Person");
}

#[test]
fn discriminator_is_injected_on_the_whole_lineage() {
    let registry = model();

    let root = registry.attribute("Contact", "finalclass").unwrap();
    assert!(root.is_final_class());
    assert_eq!(root.default, "Contact".into());
    assert_eq!(root.fixed_value, None);

    let person = registry.attribute("Person", "finalclass").unwrap();
    assert_eq!(person.fixed_value.as_deref(), Some("Person"));
    assert_eq!(
        registry.attribute_origin("Person", "finalclass").unwrap(),
        "Contact"
    );
    assert_eq!(registry.class_column("Person").unwrap(), "finalclass");

    // a standalone class gets no discriminator
    assert!(!registry.is_valid_attribute("Organization", "finalclass"));
    assert!(registry.class_column("Organization").is_err());
}

#[test]
fn inherited_attributes_keep_their_origin() {
    let registry = model();

    assert!(registry.is_valid_attribute("Team", "status"));
    assert_eq!(registry.attribute_origin("Team", "status").unwrap(), "Contact");
    assert_eq!(
        registry.attribute_origin("Person", "first_name").unwrap(),
        "Person"
    );
    // filters come along with the attributes
    assert!(registry.filter("Team", "org_id").is_ok());
    assert!(registry.filter("Team", "id").is_ok());
    assert!(registry.filter("Team", "first_name").is_err());
}

#[test]
fn key_companions_are_injected() {
    let registry = model();

    // every class names itself
    assert!(registry.attribute("Organization", "friendlyname").unwrap().is_friendly_name());
    assert!(registry.attribute("Team", "friendlyname").unwrap().is_friendly_name());

    // the name seen through each external key
    let through_key = registry.attribute("Person", "org_id_friendlyname").unwrap();
    assert_eq!(through_key.key_attr(), Some("org_id"));

    // Organization has no subclasses: no recalled discriminator
    assert!(!registry.is_valid_attribute("Person", "org_id_finalclass_recall"));

    // Person points at Person, which has no subclasses either
    assert!(registry.is_valid_attribute("Person", "manager_id_friendlyname"));
    assert!(!registry.is_valid_attribute("Person", "manager_id_finalclass_recall"));

    // org_parent_id copies a remote key, so it chains a friendly name
    let chained = registry.attribute("Contact", "org_parent_id_friendlyname").unwrap();
    let AttributeKind::ExternalField {
        key_attr,
        target_attr,
    } = &chained.kind
    else {
        panic!("expected an external field, got {chained:?}");
    };
    assert_eq!(key_attr, "org_id");
    assert_eq!(target_attr, "parent_id_friendlyname");

    // the hierarchical key counts as an external key to the class itself
    assert!(registry.is_valid_attribute("Organization", "parent_id_friendlyname"));
}

#[test]
fn ext_key_friends_lists_the_riders() {
    let registry = model();

    let friends = registry.ext_key_friends("Contact", "org_id").unwrap();
    assert_eq!(
        friends,
        [
            "org_name",
            "org_parent_id",
            "org_id_friendlyname",
            "org_parent_id_friendlyname"
        ]
    );
    assert!(registry.ext_key_friends("Contact", "name").unwrap().is_empty());
}

#[test]
fn undeclared_targets_are_tolerated() {
    let mut b = Registry::builder();
    b.declare(ClassSpec::new("Ticket").table("ticket")).unwrap();
    b.add_attribute("Ticket", Attribute::scalar("title", "title"))
        .unwrap();
    b.add_attribute(
        "Ticket",
        Attribute::external_key("service_id", "service_id", "Service"),
    )
    .unwrap();
    b.add_attribute(
        "Ticket",
        Attribute::external_field("service_name", "service_id", "name"),
    )
    .unwrap();

    let registry = b.build().unwrap();
    assert!(!registry.is_valid_attribute("Ticket", "service_id"));
    assert!(!registry.is_valid_attribute("Ticket", "service_name"));
    assert!(registry.is_valid_attribute("Ticket", "title"));
    let ignored = &registry.class("Ticket").unwrap().ignored;
    assert_eq!(ignored.get("service_id").map(String::as_str), Some("Service"));
    assert_eq!(ignored.get("service_name").map(String::as_str), Some("Service"));
}

#[test]
fn reserved_and_duplicate_codes_are_rejected() {
    let mut b = Registry::builder();
    b.declare(ClassSpec::new("Widget").table("widget")).unwrap();

    let err = b
        .add_attribute("Widget", Attribute::scalar("id", "id"))
        .unwrap_err();
    assert!(err.is_definition());
    assert!(err.to_string().contains("reserved"));

    let err = b.declare(ClassSpec::new("Widget")).unwrap_err();
    assert!(err.to_string().contains("declared twice"));
}

#[test]
fn redeclaring_an_inherited_attribute_names_the_introducing_class() {
    let mut b = Registry::builder();
    b.declare(ClassSpec::new("Contact").table("contact")).unwrap();
    b.add_attribute("Contact", Attribute::scalar("name", "name"))
        .unwrap();
    b.declare(ClassSpec::new("Person")).unwrap();
    b.inherit("Person", "Contact").unwrap();

    let err = b
        .add_attribute("Person", Attribute::scalar("name", "name"))
        .unwrap_err();
    assert!(err.to_string().contains("'Contact'"));
}

#[test]
fn external_field_must_ride_a_declared_key() {
    let mut b = Registry::builder();
    b.declare(ClassSpec::new("Ticket").table("ticket")).unwrap();
    b.add_attribute("Ticket", Attribute::scalar("title", "title"))
        .unwrap();

    let err = b
        .add_attribute(
            "Ticket",
            Attribute::external_field("caller_name", "caller_id", "name"),
        )
        .unwrap_err();
    assert!(err.is_definition());
    assert!(err.to_string().contains("caller_id"));
}

#[test]
fn external_field_must_target_a_remote_attribute() {
    let mut b = Registry::builder();
    b.declare(ClassSpec::new("Organization").table("organization"))
        .unwrap();
    b.add_attribute("Organization", Attribute::scalar("name", "name"))
        .unwrap();
    b.declare(ClassSpec::new("Ticket").table("ticket")).unwrap();
    b.add_attribute(
        "Ticket",
        Attribute::external_key("org_id", "org_id", "Organization"),
    )
    .unwrap();
    b.add_attribute(
        "Ticket",
        Attribute::external_field("org_code", "org_id", "code"),
    )
    .unwrap();

    let err = b.build().unwrap_err();
    assert!(err.is_definition());
    assert!(err.to_string().contains("'code'"));
    assert!(err.to_string().contains("'Organization'"));
}

#[test]
fn discriminator_column_is_refused_outside_the_root() {
    let mut b = Registry::builder();
    b.declare(ClassSpec::new("Contact").table("contact")).unwrap();
    b.declare(ClassSpec::new("Person").class_column("kind")).unwrap();
    b.inherit("Person", "Contact").unwrap();

    let err = b.build().unwrap_err();
    assert!(err.is_definition());
    assert!(err.to_string().contains("root"));
}

#[test]
fn name_expression_follows_the_format() {
    let registry = model();

    let expr = registry.name_expression("Person", "P").unwrap();
    assert_eq!(
        expr.render(),
        "CONCAT_WS('', `P`.`first_name`, ' ', `P`.`name`)"
    );

    // single piece collapses to the bare field
    let expr = registry.name_expression("Organization", "O").unwrap();
    assert_eq!(expr.render(), "`O`.`name`");
}

#[test]
fn extended_name_groups_subclasses_by_signature() {
    let registry = model();

    // Person names itself differently; Team and Supplier share the root's
    // shape. The first group encountered is the innermost fallback.
    let expr = registry.extended_name_expression("Contact", "C").unwrap();
    assert_eq!(
        expr.render(),
        "IF((`C`.`finalclass` IN ('Team', 'Supplier')), `C`.`name`, \
         CONCAT_WS('', `C`.`first_name`, ' ', `C`.`name`))"
    );

    // standalone classes skip the grouping entirely
    let expr = registry
        .extended_name_expression("Organization", "O")
        .unwrap();
    assert_eq!(expr.render(), "`O`.`name`");
}
