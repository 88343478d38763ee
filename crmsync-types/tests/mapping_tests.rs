use crmsync_types::{ChangeMessage, FieldMapping, FieldRule, LocalRecord, MappingSet, RecordType, SubjectKind};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── FieldRule parsing ────────────────────────────────────────────

#[test]
fn bare_string_is_direct() {
    let rule: FieldRule = serde_json::from_value(json!("email")).unwrap();
    assert_eq!(rule, FieldRule::direct("email"));
    assert!(!rule.overwrite());
}

#[test]
fn object_with_key_is_keyed() {
    let rule: FieldRule = serde_json::from_value(json!({
        "key": "first_name",
        "defaultValue": "[Unknown]",
        "overwrite": true
    }))
    .unwrap();
    assert_eq!(rule, FieldRule::keyed("first_name").with_default("[Unknown]").overwriting());
    assert_eq!(rule.default_value(), Some("[Unknown]"));
}

#[test]
fn object_with_tpl_is_templated() {
    let rule: FieldRule = serde_json::from_value(json!({"tpl": "Hello({{id}})"})).unwrap();
    assert_eq!(rule, FieldRule::templated("Hello({{id}})"));
}

#[test]
fn key_wins_over_tpl() {
    let rule: FieldRule = serde_json::from_value(json!({"key": "city", "tpl": "x"})).unwrap();
    assert!(matches!(rule, FieldRule::Keyed { .. }));
}

#[test]
fn null_overwrite_means_false() {
    let rule: FieldRule = serde_json::from_value(json!({"key": "city", "overwrite": null})).unwrap();
    assert!(!rule.overwrite());
}

#[test]
fn unrecognized_shapes_are_rejected() {
    for bad in [json!({}), json!({"overwrite": true}), json!(42), json!(""), json!({"key": ""})] {
        assert!(
            serde_json::from_value::<FieldRule>(bad.clone()).is_err(),
            "accepted {bad}"
        );
    }
}

#[test]
fn rule_serde_roundtrip_keeps_shape() {
    let rule = FieldRule::keyed("traits.company").with_default("[Unknown]");
    let value = serde_json::to_value(&rule).unwrap();
    assert_eq!(value, json!({"key": "traits.company", "defaultValue": "[Unknown]", "overwrite": false}));
}

// ── Mappings ─────────────────────────────────────────────────────

#[test]
fn mapping_set_preserves_configuration_order() {
    let set: MappingSet = serde_json::from_value(json!({
        "Foo": {"fields": {"Id": "id", "Foo": "bar"}},
        "Bar": {"fields": {"Id": "id", "Bar": "foo"}}
    }))
    .unwrap();
    let types: Vec<&str> = set.types().map(RecordType::name).collect();
    assert_eq!(types, vec!["Foo", "Bar"]);
    let fields: Vec<&str> = set.get(&"Foo".into()).unwrap().remote_fields().collect();
    assert_eq!(fields, vec!["Id", "Foo"]);
}

#[test]
fn mapping_with_array_separator() {
    let mapping = FieldMapping::new()
        .with_field("Tags", FieldRule::direct("tags"))
        .with_array_separator(";");
    assert_eq!(mapping.join_arrays.as_deref(), Some(";"));
}

#[test]
fn only_filters_types() {
    let set = MappingSet::new()
        .with(RecordType::Lead, FieldMapping::new())
        .with(RecordType::Contact, FieldMapping::new())
        .with(RecordType::Account, FieldMapping::new());
    let people = set.only(&[RecordType::Contact, RecordType::Lead]);
    let types: Vec<&RecordType> = people.types().collect();
    assert_eq!(types, vec![&RecordType::Lead, &RecordType::Contact]);
}

// ── Messages ─────────────────────────────────────────────────────

#[test]
fn message_subject_and_segments() {
    let user = LocalRecord::from_value(json!({"id": "u1", "email": "a@b.co"})).unwrap();
    let msg = ChangeMessage::user(user).with_segments(["s1", "s2"]);
    let (kind, record) = msg.subject().unwrap();
    assert_eq!(kind, SubjectKind::User);
    assert_eq!(record.email(), Some("a@b.co"));
    assert_eq!(msg.subject_id().as_deref(), Some("u1"));
    assert!(msg.in_any_segment(&["s2".to_string()]));
    assert!(!msg.in_any_segment(&["s3".to_string()]));
}

#[test]
fn empty_message_has_no_subject() {
    let msg: ChangeMessage = serde_json::from_value(json!({"segments": []})).unwrap();
    assert!(msg.subject().is_none());
}
