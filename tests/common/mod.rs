#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use attribute_filler::{
    data::Value,
    geometry::Geometry,
    model::{ExternalTable, FeatureTable},
};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    /// Copies a fixture from `tests/data` into the workspace.
    pub fn copy_fixture(&self, name: &str) -> PathBuf {
        let target = self.temp_dir.path().join(name);
        fs::copy(fixture_path(name), &target).expect("copy fixture");
        target
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.join(name)).expect("read workspace file")
    }
}

/// Layer with text attributes and no geometry values.
pub fn feature_table(columns: &[&str], rows: &[&[Option<&str>]]) -> FeatureTable {
    FeatureTable {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows: rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.map(Value::text)).collect())
            .collect(),
        geometry_column: "geometry".into(),
        geometries: rows
            .iter()
            .enumerate()
            .map(|(idx, _)| Some(Geometry::Wkt(format!("POINT ({idx} 0)"))))
            .collect(),
        crs: Some("EPSG:4326".into()),
    }
}

pub fn external_table(headers: &[&str], rows: &[&[&str]]) -> ExternalTable {
    ExternalTable::new(
        headers.iter().map(|h| h.to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect(),
    )
}
