//! Reading base layers from delimited text and writing sanitized layers.
//!
//! A layer on disk is a delimited file whose geometry column holds WKT,
//! written next to a YAML sidecar that records the layer name, CRS and the
//! sanitized field types a GeoPackage writer needs.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, cell_display},
    geometry::Geometry,
    io_utils,
    model::{Cell, FeatureTable},
    normalize::clean_header,
    sanitize::{SanitizedColumn, SanitizedTable},
};

pub const DEFAULT_GEOMETRY_COLUMN: &str = "geometry";
const DEFAULT_LAYER_NAME: &str = "merged_layer";

#[derive(Debug, Clone)]
pub struct LayerOptions {
    pub geometry_column: String,
    pub crs: Option<String>,
    pub delimiter: Option<u8>,
}

impl Default for LayerOptions {
    fn default() -> Self {
        LayerOptions {
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
            crs: None,
            delimiter: None,
        }
    }
}

/// Persisted description of a written layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSchema {
    pub layer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    pub geometry_column: String,
    pub row_count: usize,
    pub fields: Vec<SanitizedColumn>,
}

impl LayerSchema {
    pub fn describe(layer: &str, sanitized: &SanitizedTable) -> Self {
        LayerSchema {
            layer: layer.to_string(),
            crs: sanitized.table.crs.clone(),
            geometry_column: sanitized.table.geometry_column.clone(),
            row_count: sanitized.table.row_count(),
            fields: sanitized.columns.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating schema file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing layer schema YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening schema file {path:?}"))?;
        serde_yaml::from_reader(BufReader::new(file)).context("Parsing layer schema YAML")
    }
}

/// Layer name derived from an output name: spaces become underscores.
pub fn layer_name(output_name: &str) -> String {
    let name = output_name.trim().replace(' ', "_");
    if name.is_empty() {
        DEFAULT_LAYER_NAME.to_string()
    } else {
        name
    }
}

/// `<stem>_merged.csv` next to the base file.
pub fn default_output_path(base: &Path) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "-")
        .unwrap_or("layer");
    base.with_file_name(format!("{stem}_merged.csv"))
}

pub fn schema_path_for(output: &Path) -> PathBuf {
    output.with_extension("schema.yml")
}

pub fn read_feature_layer(path: &Path, options: &LayerOptions) -> Result<FeatureTable> {
    let bytes = io_utils::read_input_bytes(path)?;
    let decoded = io_utils::decode_text(&bytes, None);
    let delimiter = options
        .delimiter
        .or_else(|| io_utils::delimiter_for_path(path))
        .unwrap_or_else(|| io_utils::sniff_delimiter(&decoded.text));
    debug!(
        "Reading base layer {:?} ({}, delimiter '{}')",
        path,
        decoded.encoding,
        io_utils::printable_delimiter(delimiter)
    );

    let mut reader = io_utils::open_csv_reader(decoded.text.as_bytes(), delimiter);
    let mut records = reader.records();
    let headers = records
        .next()
        .ok_or_else(|| anyhow!("Base layer {path:?} is empty"))?
        .with_context(|| format!("Reading header of {path:?}"))?
        .iter()
        .map(clean_header)
        .collect::<Vec<_>>();
    let geometry_idx = headers
        .iter()
        .position(|h| *h == options.geometry_column)
        .ok_or_else(|| {
            anyhow!(
                "Geometry column '{}' not found in base layer {path:?}",
                options.geometry_column
            )
        })?;

    let columns = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != geometry_idx)
        .map(|(_, name)| name.clone())
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    let mut geometries = Vec::new();
    for (row_idx, record) in records.enumerate() {
        let record = record.with_context(|| format!("Reading base row {}", row_idx + 2))?;
        if record.len() > headers.len() {
            bail!(
                "Base row {} has {} field(s) but the header has {}",
                row_idx + 2,
                record.len(),
                headers.len()
            );
        }
        let mut cells: Vec<Cell> = Vec::with_capacity(columns.len());
        let mut geometry = None;
        for idx in 0..headers.len() {
            let raw = record.get(idx).unwrap_or("");
            let value = (!raw.trim().is_empty()).then(|| raw.to_string());
            if idx == geometry_idx {
                geometry = value.map(Geometry::Wkt);
            } else {
                cells.push(value.map(Value::Text));
            }
        }
        rows.push(cells);
        geometries.push(geometry);
    }

    Ok(FeatureTable {
        columns,
        rows,
        geometry_column: options.geometry_column.clone(),
        geometries,
        crs: options.crs.clone(),
    })
}

fn geometry_text(geometry: Option<&Geometry>) -> String {
    match geometry {
        Some(Geometry::Wkt(text)) => text.clone(),
        Some(Geometry::Wkb(bytes)) => bytes.iter().map(|b| format!("{b:02X}")).collect(),
        None => String::new(),
    }
}

/// Writes attribute columns followed by the geometry column.
pub fn write_layer(sanitized: &SanitizedTable, output: Option<&Path>, delimiter: u8) -> Result<usize> {
    let table = &sanitized.table;
    let mut writer = io_utils::open_csv_writer(output, delimiter)?;
    let mut headers = table.columns.clone();
    headers.push(table.geometry_column.clone());
    writer
        .write_record(&headers)
        .context("Writing layer headers")?;

    for (idx, row) in table.rows.iter().enumerate() {
        let mut record = row
            .iter()
            .map(|cell| cell_display(cell.as_ref()))
            .collect::<Vec<_>>();
        record.push(geometry_text(table.geometries.get(idx).and_then(Option::as_ref)));
        writer
            .write_record(&record)
            .with_context(|| format!("Writing layer row {}", idx + 2))?;
    }
    writer.flush().context("Flushing layer output")?;
    Ok(table.row_count())
}
