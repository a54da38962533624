use serde_json::Value;
use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("CLI crate should be inside workspace")
        .to_path_buf()
}

fn load_fixture(name: &str) -> Value {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read fixture {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("fixture is valid JSON")
}

fn load_schema(name: &str) -> Value {
    let path = workspace_root().join("schema").join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read schema {}: {}", path.display(), e));
    serde_json::from_str(&text).expect("schema is valid JSON")
}

fn validator() -> jsonschema::Validator {
    let schema = load_schema("stress_report.schema.json");
    jsonschema::draft202012::new(&schema).expect("stress report schema compiles")
}

// ---------------------------------------------------------------------------
// Positive validation
// ---------------------------------------------------------------------------

#[test]
fn test_stress_report_fixture_conforms_to_schema() {
    let fixture = load_fixture("stress_report.json");
    if let Err(e) = validator().validate(&fixture) {
        panic!("stress report fixture failed validation: {e}");
    }
}

#[test]
fn test_report_without_projects_is_valid() {
    let mut fixture = load_fixture("stress_report.json");
    fixture["projects"] = Value::Array(vec![]);
    assert!(validator().is_valid(&fixture));
}

// ---------------------------------------------------------------------------
// Negative validation
// ---------------------------------------------------------------------------

#[test]
fn test_missing_totals_rejected() {
    let mut fixture = load_fixture("stress_report.json");
    fixture.as_object_mut().unwrap().remove("totals");
    assert!(!validator().is_valid(&fixture));
}

#[test]
fn test_negative_counter_rejected() {
    let mut fixture = load_fixture("stress_report.json");
    fixture["reads"]["errors"] = Value::from(-1);
    assert!(!validator().is_valid(&fixture));
}

#[test]
fn test_zero_readers_rejected() {
    let mut fixture = load_fixture("stress_report.json");
    fixture["readers"] = Value::from(0);
    assert!(!validator().is_valid(&fixture));
}

#[test]
fn test_project_row_missing_counter_rejected() {
    let mut fixture = load_fixture("stress_report.json");
    fixture["projects"][0]
        .as_object_mut()
        .unwrap()
        .remove("slot_unavailable");
    assert!(!validator().is_valid(&fixture));
}

#[test]
fn test_stale_must_be_boolean() {
    let mut fixture = load_fixture("stress_report.json");
    fixture["projects"][1]["stale"] = Value::from("no");
    assert!(!validator().is_valid(&fixture));
}
