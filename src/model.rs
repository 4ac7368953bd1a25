//! In-memory tables handed between the pipeline stages.

use anyhow::{Result, bail};

use crate::{data::Value, geometry::Geometry};

pub type Cell = Option<Value>;

/// A feature layer's attribute table. Geometry lives beside the attribute
/// columns, one entry per row, and is never treated as an attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub geometry_column: String,
    pub geometries: Vec<Option<Geometry>>,
    pub crs: Option<String>,
}

impl FeatureTable {
    /// A table without attribute columns, one empty row per geometry.
    pub fn from_geometries(
        geometry_column: impl Into<String>,
        geometries: Vec<Option<Geometry>>,
        crs: Option<String>,
    ) -> Self {
        FeatureTable {
            columns: Vec::new(),
            rows: vec![Vec::new(); geometries.len()],
            geometry_column: geometry_column.into(),
            geometries,
            crs,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column)).and_then(Option::as_ref)
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = Option<&Value>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(column).and_then(Option::as_ref))
    }

    /// Appends an attribute column; `values` must hold one cell per row.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Cell>) -> Result<()> {
        if values.len() != self.rows.len() {
            bail!(
                "Column has {} value(s) but the layer has {} row(s)",
                values.len(),
                self.rows.len()
            );
        }
        self.columns.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.geometries.len() != self.rows.len() {
            bail!(
                "Layer has {} row(s) but {} geometry value(s)",
                self.rows.len(),
                self.geometries.len()
            );
        }
        for (idx, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                bail!(
                    "Row {} has {} cell(s) but the layer defines {} column(s)",
                    idx + 1,
                    row.len(),
                    self.columns.len()
                );
            }
        }
        Ok(())
    }
}

/// Incoming attribute data. Every cell is text; an empty string is an empty cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExternalTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExternalTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        ExternalTable { headers, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, row) in self.rows.iter().enumerate() {
            if row.len() > self.headers.len() {
                bail!(
                    "Attribute row {} has {} cell(s) but only {} header(s)",
                    idx + 1,
                    row.len(),
                    self.headers.len()
                );
            }
        }
        Ok(())
    }
}
