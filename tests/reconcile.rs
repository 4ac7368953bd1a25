mod common;

use attribute_filler::{
    ReconcileError, TableRole,
    data::Value,
    model::{ExternalTable, FeatureTable},
    reconcile, reconcile_with_summary, sanitize,
    sanitize::FieldType,
};
use common::{external_table, feature_table};
use proptest::prelude::*;

fn text(value: &str) -> Option<Value> {
    Some(Value::text(value))
}

#[test]
fn tolerant_keys_fill_owner_and_blank_stays_null() {
    let base = feature_table(
        &["id", "name"],
        &[&[Some("A-01"), Some("X")], &[Some("A-02"), Some("Y")]],
    );
    let incoming = external_table(&["code", "owner"], &[&["a 01", "Smith"], &["A-02", ""]]);

    let (merged, summary) = reconcile_with_summary(&base, &incoming, "id", "code").expect("merge");

    assert_eq!(merged.columns, vec!["id", "name", "owner"]);
    assert_eq!(merged.row_count(), 2);
    assert_eq!(merged.rows[0], vec![text("A-01"), text("X"), text("Smith")]);
    assert_eq!(merged.rows[1], vec![text("A-02"), text("Y"), None]);
    assert_eq!(summary.matched_rows, 2);
    assert_eq!(summary.added_columns, vec!["owner"]);
    assert_eq!(merged.geometries, base.geometries);
    assert_eq!(merged.crs, base.crs);
}

#[test]
fn first_duplicate_key_wins_without_fan_out() {
    let base = feature_table(&["id"], &[&[Some("B-1")], &[Some("B-2")]]);
    let incoming = external_table(
        &["code", "owner"],
        &[&["B-1", "first"], &["b 1", "second"], &["B_1", "third"]],
    );

    let (merged, summary) = reconcile_with_summary(&base, &incoming, "id", "code").expect("merge");

    assert_eq!(merged.row_count(), 2);
    assert_eq!(merged.rows[0][1], text("first"));
    assert_eq!(merged.rows[1][1], None);
    assert_eq!(summary.duplicate_keys, 2);
    assert_eq!(summary.unmatched_rows, 1);
}

#[test]
fn equivalent_column_names_share_one_attribute() {
    let base = feature_table(
        &["id", "Station_Name"],
        &[&[Some("1"), Some("Old")], &[Some("2"), Some("Kept")]],
    );
    let incoming = external_table(&["id", "station name"], &[&["1", "New"], &["2", "  "]]);

    let (merged, summary) = reconcile_with_summary(&base, &incoming, "id", "id").expect("merge");

    assert_eq!(merged.columns, vec!["id", "Station_Name"]);
    assert_eq!(merged.rows[0][1], text("New"));
    assert_eq!(merged.rows[1][1], text("Kept"));
    assert_eq!(summary.overwritten_columns, vec!["Station_Name"]);
    assert_eq!(summary.overwritten_cells, 1);

    let sanitized = sanitize(&merged);
    let names = sanitized
        .columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["id", "Station_Name"]);
}

#[test]
fn present_values_overwrite_base_values() {
    let base = feature_table(&["id", "capacity"], &[&[Some("1"), Some("100")]]);
    let incoming = external_table(&["id", "Capacity"], &[&["1", "150"]]);

    let merged = reconcile(&base, &incoming, "id", "id").expect("merge");
    assert_eq!(merged.columns, vec!["id", "capacity"]);
    assert_eq!(merged.rows[0][1], text("150"));
}

#[test]
fn padded_incoming_values_are_stored_trimmed() {
    let base = feature_table(&["id", "capacity"], &[&[Some("1"), Some("100")], &[Some("2"), Some("80")]]);
    let incoming = external_table(&["id", "capacity"], &[&["1", " 150 "], &["2", " 80\t"]]);

    let (merged, summary) = reconcile_with_summary(&base, &incoming, "id", "id").expect("merge");
    assert_eq!(merged.rows[0][1], text("150"));
    assert_eq!(merged.rows[1][1], text("80"));
    assert_eq!(summary.overwritten_cells, 1);

    let sanitized = sanitize(&merged);
    assert_eq!(sanitized.field_type("capacity"), Some(FieldType::Integer));
    assert_eq!(sanitized.table.rows[0][1], Some(Value::Integer(150)));
}

#[test]
fn unmatched_rows_keep_base_values_and_gain_nulls() {
    let base = feature_table(&["id", "voltage"], &[&[Some("X-9"), Some("33")], &[None, Some("11")]]);
    let incoming = external_table(&["id", "voltage", "owner"], &[&["Y-1", "66", "Other"]]);

    let merged = reconcile(&base, &incoming, "id", "id").expect("merge");

    assert_eq!(merged.rows[0], vec![text("X-9"), text("33"), None]);
    assert_eq!(merged.rows[1], vec![None, text("11"), None]);
}

#[test]
fn missing_key_columns_name_their_table() {
    let base = feature_table(&["id"], &[&[Some("1")]]);
    let incoming = external_table(&["code"], &[&["1"]]);

    let err = reconcile(&base, &incoming, "station_id", "code").unwrap_err();
    assert!(matches!(
        &err,
        ReconcileError::KeyColumnNotFound { column, table: TableRole::Base } if column == "station_id"
    ));
    assert_eq!(
        err.to_string(),
        "Column 'station_id' not found in base layer fields"
    );

    let err = reconcile(&base, &incoming, "id", "owner_code").unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::KeyColumnNotFound {
            table: TableRole::Incoming,
            ..
        }
    ));
}

#[test]
fn inconsistent_base_layer_fails_merge() {
    let mut base = feature_table(&["id"], &[&[Some("1")], &[Some("2")]]);
    base.geometries.pop();
    let incoming = external_table(&["id", "owner"], &[&["1", "Smith"]]);

    let err = reconcile(&base, &incoming, "id", "id").unwrap_err();
    assert!(matches!(err, ReconcileError::MergeFailed { .. }));
    assert!(err.to_string().contains("geometry value"));
}

#[test]
fn empty_incoming_table_adds_empty_columns() {
    let base = feature_table(&["id"], &[&[Some("1")]]);
    let incoming = ExternalTable::new(vec!["id".into(), "owner".into()], Vec::new());

    let (merged, summary) = reconcile_with_summary(&base, &incoming, "id", "id").expect("merge");
    assert_eq!(merged.columns, vec!["id", "owner"]);
    assert_eq!(merged.rows[0], vec![text("1"), None]);
    assert_eq!(summary.unmatched_rows, 1);
}

fn key_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        "[A-Ca-c][-_ ]?[0-3]".prop_map(Some),
        Just(Some("  ".to_string())),
    ]
}

proptest! {
    #[test]
    fn merged_row_count_matches_base(
        base_keys in prop::collection::vec(key_strategy(), 0..20),
        incoming_rows in prop::collection::vec(
            ("[A-Ca-c][-_ ]?[0-3]", "[a-z]{0,4}", "[a-z]{0,4}"),
            0..20,
        ),
    ) {
        let base = FeatureTable {
            columns: vec!["id".into(), "owner".into()],
            rows: base_keys
                .iter()
                .map(|key| vec![key.clone().map(Value::Text), Some(Value::text("orig"))])
                .collect(),
            geometry_column: "geometry".into(),
            geometries: vec![None; base_keys.len()],
            crs: None,
        };
        let incoming = ExternalTable::new(
            vec!["code".into(), "owner".into(), "note".into()],
            incoming_rows
                .iter()
                .map(|(code, owner, note)| vec![code.clone(), owner.clone(), note.clone()])
                .collect(),
        );

        let merged = reconcile(&base, &incoming, "id", "code").expect("merge");
        prop_assert_eq!(merged.row_count(), base.row_count());
        prop_assert_eq!(merged.columns.clone(), vec!["id".to_string(), "owner".to_string(), "note".to_string()]);
        for row in &merged.rows {
            // Blank incoming owners never erase the base value.
            prop_assert!(row[1].is_some());
        }
    }
}
