mod common;

use std::fs;

use assert_cmd::Command;
use attribute_filler::{layer::LayerSchema, sanitize::FieldType};
use common::TestWorkspace;
use predicates::{prelude::*, str::contains};

fn merge_fixtures(workspace: &TestWorkspace) -> (String, String) {
    let base = workspace.copy_fixture("substations.csv");
    let attributes = workspace.copy_fixture("substation_owners.tsv");
    (
        base.to_str().unwrap().to_string(),
        attributes.to_str().unwrap().to_string(),
    )
}

#[test]
fn merge_writes_layer_and_schema_next_to_base() {
    let workspace = TestWorkspace::new();
    let (base, attributes) = merge_fixtures(&workspace);

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args([
            "merge",
            "-b",
            &base,
            "-a",
            &attributes,
            "--base-key",
            "station_id",
            "--attr-key",
            "Code",
            "--crs",
            "EPSG:4326",
        ])
        .assert()
        .success();

    let output = workspace.read("substations_merged.csv");
    let lines = output.lines().collect::<Vec<_>>();
    assert_eq!(
        lines[0],
        r#""station_id","Station_Name","voltage_kv","owner","commissioned","geometry""#
    );
    assert_eq!(
        lines[1],
        r#""RW-001","Kigali North","110","REG","2018-05-01","POINT (30.06 -1.94)""#
    );
    assert_eq!(
        lines[2],
        r#""RW-002","Musanze","","","","POINT (29.63 -1.50)""#
    );
    assert!(lines[3].starts_with(r#""RW-003","Huye","220","EUCL","2020-01-15","POLYGON"#));
    assert_eq!(lines.len(), 4);

    let schema = LayerSchema::load(&workspace.join("substations_merged.schema.yml"))
        .expect("schema sidecar");
    assert_eq!(schema.layer, "substations_merged");
    assert_eq!(schema.crs.as_deref(), Some("EPSG:4326"));
    assert_eq!(schema.row_count, 3);
    let types = schema
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.field_type))
        .collect::<Vec<_>>();
    assert_eq!(
        types,
        vec![
            ("station_id", FieldType::Text),
            ("Station_Name", FieldType::Text),
            ("voltage_kv", FieldType::Integer),
            ("owner", FieldType::Text),
            ("commissioned", FieldType::Date),
        ]
    );
}

#[test]
fn merge_can_reduce_geometries_to_centroids() {
    let workspace = TestWorkspace::new();
    let (base, attributes) = merge_fixtures(&workspace);
    let output = workspace.join("points.csv");

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args([
            "merge",
            "-b",
            &base,
            "-a",
            &attributes,
            "--base-key",
            "station_id",
            "--attr-key",
            "Code",
            "--centroid",
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(&output).expect("read output");
    assert!(!contents.contains("POLYGON"));
    assert!(contents.contains("POINT (30.06 -1.94)"));
    assert!(contents.contains("POINT (29.7"));
    assert!(workspace.join("points.schema.yml").exists());
}

#[test]
fn merge_reports_missing_key_column() {
    let workspace = TestWorkspace::new();
    let (base, attributes) = merge_fixtures(&workspace);

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args([
            "merge",
            "-b",
            &base,
            "-a",
            &attributes,
            "--base-key",
            "station",
            "--attr-key",
            "Code",
        ])
        .assert()
        .failure()
        .stderr(contains("Column 'station' not found in base layer fields"));
    assert!(!workspace.join("substations_merged.csv").exists());
}

#[test]
fn merge_reads_pasted_text_from_stdin_and_writes_stdout() {
    let workspace = TestWorkspace::new();
    let (base, _) = merge_fixtures(&workspace);

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args([
            "merge",
            "-b",
            &base,
            "-a",
            "-",
            "--kind",
            "text",
            "--base-key",
            "station_id",
            "--attr-key",
            "Code",
            "-o",
            "-",
        ])
        .write_stdin("Code\tOperator\nRW-002\tREG\n")
        .assert()
        .success()
        .stdout(contains(r#""RW-002","Musanze","","REG","POINT (29.63 -1.50)""#))
        .stdout(contains("Operator"));
}

#[test]
fn batch_keep_going_skips_failed_jobs() {
    let workspace = TestWorkspace::new();
    merge_fixtures(&workspace);
    let manifest = workspace.write(
        "jobs.yml",
        "jobs:\n  - base: substations.csv\n    attributes: missing.csv\n    base_key: station_id\n    attr_key: Code\n  - base: substations.csv\n    attributes: substation_owners.tsv\n    base_key: station_id\n    attr_key: Code\n    drop_empty_columns: true\n",
    );

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args(["batch", "-m", manifest.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("Job 1"));

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args(["batch", "-m", manifest.to_str().unwrap(), "--keep-going"])
        .assert()
        .success();
    let output = workspace.read("substations_merged.csv");
    assert!(output.contains("\"EUCL\""));
}

#[test]
fn batch_numbers_repeated_outputs() {
    let workspace = TestWorkspace::new();
    merge_fixtures(&workspace);
    let job = "  - base: substations.csv\n    attributes: substation_owners.tsv\n    base_key: station_id\n    attr_key: Code\n";
    let manifest = workspace.write("jobs.yml", &format!("jobs:\n{job}{job}"));

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args(["batch", "--manifest", manifest.to_str().unwrap()])
        .assert()
        .success();
    assert!(workspace.join("substations_merged.csv").exists());
    assert!(workspace.join("substations_merged_1.csv").exists());
    assert!(workspace.join("substations_merged_1.schema.yml").exists());
}

#[test]
fn keys_lists_matching_columns() {
    let workspace = TestWorkspace::new();
    let (base, attributes) = merge_fixtures(&workspace);

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args(["keys", "-b", &base, "-a", &attributes])
        .assert()
        .success()
        .stdout(contains("base_key"))
        .stdout(contains("Station_Name"))
        .stdout(contains("station name"))
        .stdout(contains("2/3"));
}

#[test]
fn preview_limits_rows() {
    let workspace = TestWorkspace::new();
    let (_, attributes) = merge_fixtures(&workspace);

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args(["preview", "-a", &attributes, "--rows", "2"])
        .assert()
        .success()
        .stdout(contains("commissioned"))
        .stdout(contains("EUCL"))
        .stdout(contains("Ignored").not());
}

#[test]
fn unknown_encoding_is_rejected() {
    let workspace = TestWorkspace::new();
    let (_, attributes) = merge_fixtures(&workspace);

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args(["preview", "-a", &attributes, "--input-encoding", "klingon"])
        .assert()
        .failure()
        .stderr(contains("Unknown encoding 'klingon'"));
}

#[test]
fn preview_reads_named_worksheet() {
    let workspace = TestWorkspace::new();
    let workbook = workspace.copy_fixture("substation_assets.xlsx");

    Command::cargo_bin("attribute-filler")
        .expect("binary exists")
        .args(["preview", "-a", workbook.to_str().unwrap(), "--sheet", "Owners"])
        .assert()
        .success()
        .stdout(contains("owner"))
        .stdout(contains("EUCL"))
        .stdout(contains("T1").not());
}
