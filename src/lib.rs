pub mod batch;
pub mod cli;
pub mod data;
pub mod error;
pub mod geometry;
pub mod io_utils;
pub mod layer;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod reconcile;
pub mod sanitize;
pub mod store;
pub mod table;

use std::{collections::HashSet, env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

pub use crate::{
    error::{ReconcileError, TableRole},
    geometry::{centroid, reduce_to_centroids},
    loader::{forward_fill, load_pasted, load_table},
    model::{ExternalTable, FeatureTable},
    normalize::{normalize_column_name, normalize_join_value, suggest_key_pairs},
    reconcile::{ReconcileSummary, reconcile, reconcile_with_summary},
    sanitize::{SanitizedTable, drop_empty_columns, sanitize},
};

use crate::{
    batch::{BatchManifest, MergeJob},
    cli::{AttributeSourceArgs, Cli, Commands},
    normalize::normalize_cell,
    store::MemoryStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("attribute_filler", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Merge(args) => handle_merge(&args),
        Commands::Batch(args) => handle_batch(&args),
        Commands::Keys(args) => handle_keys(&args),
        Commands::Preview(args) => handle_preview(&args),
    }
}

fn handle_merge(args: &cli::MergeArgs) -> Result<()> {
    let job = MergeJob::from(args);
    let mut store = MemoryStore::new();
    let report = batch::run_job(&job, &mut store)?;
    match &report.output {
        Some(path) => info!(
            "Wrote {} feature(s) with {} field(s) to {:?}",
            report.rows,
            report.fields.len(),
            path
        ),
        None => info!("Wrote {} feature(s) to stdout", report.rows),
    }
    if let Some(schema) = &report.schema {
        info!("Schema sidecar written to {schema:?}");
    }
    Ok(())
}

fn handle_batch(args: &cli::BatchArgs) -> Result<()> {
    let manifest = BatchManifest::load(&args.manifest)?;
    info!(
        "Running {} job(s) from {:?}",
        manifest.jobs.len(),
        args.manifest
    );
    let mut store = MemoryStore::new();
    let outcome = batch::run_batch(&manifest, args.keep_going, &mut store)?;
    for report in &outcome.completed {
        if let Some(path) = &report.output {
            info!("{} feature(s) -> {:?}", report.rows, path);
        }
    }
    Ok(())
}

fn load_source(source: &AttributeSourceArgs) -> Result<ExternalTable> {
    let options = batch::loader_options(
        source.delimiter,
        source.input_encoding.as_deref(),
        source.sheet.clone(),
        !source.no_forward_fill,
    )?;
    batch::read_attribute_table(&source.attributes, source.kind, &options)
}

fn handle_keys(args: &cli::KeysArgs) -> Result<()> {
    let layer_options = layer::LayerOptions {
        geometry_column: args.layer.geometry_column.clone(),
        crs: args.layer.crs.clone(),
        delimiter: args.layer.base_delimiter,
    };
    let base = layer::read_feature_layer(&args.layer.base, &layer_options)
        .with_context(|| format!("Reading base layer {:?}", args.layer.base))?;
    let incoming = load_source(&args.source)?;

    let pairs = suggest_key_pairs(&base.columns, &incoming.headers);
    if pairs.is_empty() {
        info!("No column names match between the base layer and the attribute table");
        return Ok(());
    }
    let rows = pairs
        .iter()
        .map(|(base_col, incoming_col)| {
            let matched = matching_rows(&base, base_col, &incoming, incoming_col);
            vec![
                base_col.clone(),
                incoming_col.clone(),
                format!("{matched}/{}", base.row_count()),
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(
        &[
            "base_key".to_string(),
            "attr_key".to_string(),
            "matched".to_string(),
        ],
        &rows,
    );
    Ok(())
}

/// Base rows whose key would find a partner in the attribute table.
fn matching_rows(
    base: &FeatureTable,
    base_col: &str,
    incoming: &ExternalTable,
    incoming_col: &str,
) -> usize {
    let (Some(base_idx), Some(incoming_idx)) =
        (base.column_index(base_col), incoming.column_index(incoming_col))
    else {
        return 0;
    };
    let keys = incoming
        .rows
        .iter()
        .filter_map(|row| row.get(incoming_idx))
        .map(|raw| normalize_join_value(raw))
        .filter(|key| !key.is_empty())
        .collect::<HashSet<_>>();
    base.column_values(base_idx)
        .map(normalize_cell)
        .filter(|key| keys.contains(key))
        .count()
}

fn handle_preview(args: &cli::PreviewArgs) -> Result<()> {
    let incoming = load_source(&args.source)?;
    let rows = incoming
        .rows
        .iter()
        .take(args.rows)
        .cloned()
        .collect::<Vec<_>>();
    table::print_table(&incoming.headers, &rows);
    info!(
        "Displayed {} of {} row(s), {} column(s)",
        rows.len(),
        incoming.row_count(),
        incoming.headers.len()
    );
    Ok(())
}
