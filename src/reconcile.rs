//! Left join of an attribute table onto a feature layer.
//!
//! The output always has exactly one row per base feature. Incoming keys are
//! compared in their normalized join form and the first incoming row wins for
//! each key, so duplicated keys never fan a feature out into several rows.

use std::collections::{HashMap, hash_map::Entry};

use anyhow::{Context, anyhow};
use log::{debug, warn};

use crate::{
    data::Value,
    error::{ReconcileError, TableRole},
    model::{Cell, ExternalTable, FeatureTable},
    normalize::{normalize_cell, normalize_column_name, normalize_join_value},
};

/// What a merge did, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub matched_rows: usize,
    pub unmatched_rows: usize,
    /// Incoming rows ignored because an earlier row had the same key.
    pub duplicate_keys: usize,
    /// Base cells replaced by a non-blank incoming value.
    pub overwritten_cells: usize,
    pub overwritten_columns: Vec<String>,
    pub added_columns: Vec<String>,
    /// Incoming columns left out: geometry clashes and repeated names.
    pub skipped_columns: Vec<String>,
    /// Base columns left out because an earlier column had the same normalized name.
    pub dropped_base_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Overwrite(usize),
    Append(usize),
}

impl Target {
    fn position(self) -> usize {
        match self {
            Target::Overwrite(pos) | Target::Append(pos) => pos,
        }
    }
}

#[derive(Debug)]
struct ColumnPlan {
    kept_base: Vec<usize>,
    sources: Vec<(usize, Target)>,
    output_columns: Vec<String>,
}

pub fn reconcile(
    base: &FeatureTable,
    incoming: &ExternalTable,
    base_key: &str,
    incoming_key: &str,
) -> Result<FeatureTable, ReconcileError> {
    reconcile_with_summary(base, incoming, base_key, incoming_key).map(|(table, _)| table)
}

pub fn reconcile_with_summary(
    base: &FeatureTable,
    incoming: &ExternalTable,
    base_key: &str,
    incoming_key: &str,
) -> Result<(FeatureTable, ReconcileSummary), ReconcileError> {
    let base_key_idx = base
        .column_index(base_key)
        .ok_or_else(|| ReconcileError::missing_key(base_key, TableRole::Base))?;
    let incoming_key_idx = incoming
        .column_index(incoming_key)
        .ok_or_else(|| ReconcileError::missing_key(incoming_key, TableRole::Incoming))?;

    base.validate()
        .context("Validating base layer")
        .map_err(ReconcileError::merge_failed)?;
    incoming
        .validate()
        .context("Validating attribute table")
        .map_err(ReconcileError::merge_failed)?;

    let mut summary = ReconcileSummary::default();
    let plan = plan_columns(base, incoming, base_key_idx, incoming_key_idx, &mut summary);
    let lookup = build_lookup(incoming, incoming_key_idx, &mut summary);

    let mut rows: Vec<Vec<Cell>> = Vec::with_capacity(base.row_count());
    for row in &base.rows {
        let mut merged: Vec<Cell> = plan.kept_base.iter().map(|idx| row[*idx].clone()).collect();
        merged.resize(plan.output_columns.len(), None);

        let key = normalize_cell(row[base_key_idx].as_ref());
        let source = if key.is_empty() {
            None
        } else {
            lookup.get(&key).map(|idx| &incoming.rows[*idx])
        };
        match source {
            Some(source) => {
                summary.matched_rows += 1;
                apply_source(&mut merged, source, &plan, &mut summary);
            }
            None => summary.unmatched_rows += 1,
        }
        rows.push(merged);
    }

    if rows.len() != base.row_count() {
        return Err(ReconcileError::merge_failed(anyhow!(
            "merged {} row(s) from {} feature(s)",
            rows.len(),
            base.row_count()
        )));
    }

    debug!(
        "Reconciled {} feature(s): {} matched, {} unmatched, {} duplicate key(s) ignored",
        rows.len(),
        summary.matched_rows,
        summary.unmatched_rows,
        summary.duplicate_keys
    );

    let table = FeatureTable {
        columns: plan.output_columns,
        rows,
        geometry_column: base.geometry_column.clone(),
        geometries: base.geometries.clone(),
        crs: base.crs.clone(),
    };
    Ok((table, summary))
}

fn apply_source(
    merged: &mut [Cell],
    source: &[String],
    plan: &ColumnPlan,
    summary: &mut ReconcileSummary,
) {
    for (incoming_idx, target) in &plan.sources {
        let raw = source
            .get(*incoming_idx)
            .map(|cell| cell.trim())
            .unwrap_or("");
        if raw.is_empty() {
            // Blanks never erase what the layer already knows.
            continue;
        }
        let slot = &mut merged[target.position()];
        if let Target::Overwrite(_) = target {
            if slot.as_ref().is_some_and(|current| current.as_display() != raw) {
                summary.overwritten_cells += 1;
            }
        }
        *slot = Some(Value::text(raw));
    }
}

fn plan_columns(
    base: &FeatureTable,
    incoming: &ExternalTable,
    base_key_idx: usize,
    incoming_key_idx: usize,
    summary: &mut ReconcileSummary,
) -> ColumnPlan {
    let key_norm = normalize_column_name(&base.columns[base_key_idx]);
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut kept_base = Vec::with_capacity(base.columns.len());
    let mut output_columns = Vec::with_capacity(base.columns.len() + incoming.headers.len());

    for (idx, name) in base.columns.iter().enumerate() {
        let norm = normalize_column_name(name);
        // The join key survives its normalized group wherever it sits.
        let displaced_by_key = norm == key_norm && idx != base_key_idx;
        if displaced_by_key || positions.contains_key(&norm) {
            summary.dropped_base_columns.push(name.clone());
            continue;
        }
        positions.insert(norm, output_columns.len());
        kept_base.push(idx);
        output_columns.push(name.clone());
    }

    let geometry_norm = normalize_column_name(&base.geometry_column);
    let mut sources = Vec::new();
    for (idx, name) in incoming.headers.iter().enumerate() {
        if idx == incoming_key_idx {
            continue;
        }
        let norm = normalize_column_name(name);
        if norm == geometry_norm {
            warn!("Ignoring attribute column '{name}': it clashes with the geometry column");
            summary.skipped_columns.push(name.clone());
            continue;
        }
        match positions.entry(norm) {
            Entry::Occupied(entry) => {
                let pos = *entry.get();
                // Appended columns are always already targeted, so an untargeted
                // position is a base column.
                let targeted = sources
                    .iter()
                    .any(|(_, target): &(usize, Target)| target.position() == pos);
                if targeted {
                    debug!("Ignoring repeated attribute column '{name}'");
                    summary.skipped_columns.push(name.clone());
                } else {
                    sources.push((idx, Target::Overwrite(pos)));
                    summary.overwritten_columns.push(output_columns[pos].clone());
                }
            }
            Entry::Vacant(entry) => {
                let pos = output_columns.len();
                entry.insert(pos);
                sources.push((idx, Target::Append(pos)));
                output_columns.push(name.clone());
                summary.added_columns.push(name.clone());
            }
        }
    }

    ColumnPlan {
        kept_base,
        sources,
        output_columns,
    }
}

fn build_lookup(
    incoming: &ExternalTable,
    key_idx: usize,
    summary: &mut ReconcileSummary,
) -> HashMap<String, usize> {
    let mut lookup = HashMap::with_capacity(incoming.row_count());
    for (row_idx, row) in incoming.rows.iter().enumerate() {
        let raw = row.get(key_idx).map(String::as_str).unwrap_or("");
        let key = normalize_join_value(raw);
        if key.is_empty() {
            continue;
        }
        match lookup.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(row_idx);
            }
            Entry::Occupied(entry) => {
                summary.duplicate_keys += 1;
                debug!(
                    "Attribute row {} repeats key '{}'; keeping row {}",
                    row_idx + 1,
                    raw,
                    entry.get() + 1
                );
            }
        }
    }
    lookup
}
