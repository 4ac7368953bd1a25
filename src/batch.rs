//! Merge jobs: one base layer joined with one attribute table, written as a
//! sanitized layer plus schema sidecar. `merge` runs a single job built from
//! the command line; `batch` runs every job listed in a YAML manifest.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};

use crate::{
    cli::{InputKind, MergeArgs, parse_delimiter},
    geometry::reduce_to_centroids,
    io_utils,
    layer::{self, DEFAULT_GEOMETRY_COLUMN, LayerOptions, LayerSchema},
    loader::{self, LoaderOptions, TableKind},
    model::ExternalTable,
    reconcile::{ReconcileSummary, reconcile_with_summary},
    sanitize::{self, SanitizedColumn},
    store::KeyValueStore,
};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MergeJob {
    pub base: PathBuf,
    pub attributes: PathBuf,
    pub base_key: String,
    pub attr_key: String,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub schema_out: Option<PathBuf>,
    #[serde(default)]
    pub kind: Option<InputKind>,
    #[serde(default, deserialize_with = "deserialize_delimiter")]
    pub delimiter: Option<u8>,
    #[serde(default, deserialize_with = "deserialize_delimiter")]
    pub base_delimiter: Option<u8>,
    #[serde(default)]
    pub input_encoding: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default = "default_forward_fill")]
    pub forward_fill: bool,
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub centroid: bool,
    #[serde(default)]
    pub drop_empty_columns: bool,
}

fn default_forward_fill() -> bool {
    true
}

fn default_geometry_column() -> String {
    DEFAULT_GEOMETRY_COLUMN.to_string()
}

fn deserialize_delimiter<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| parse_delimiter(&value).map_err(serde::de::Error::custom))
        .transpose()
}

impl From<&MergeArgs> for MergeJob {
    fn from(args: &MergeArgs) -> Self {
        MergeJob {
            base: args.layer.base.clone(),
            attributes: args.source.attributes.clone(),
            base_key: args.base_key.clone(),
            attr_key: args.attr_key.clone(),
            output: args.output.clone(),
            schema_out: args.schema_out.clone(),
            kind: args.source.kind,
            delimiter: args.source.delimiter,
            base_delimiter: args.layer.base_delimiter,
            input_encoding: args.source.input_encoding.clone(),
            sheet: args.source.sheet.clone(),
            forward_fill: !args.source.no_forward_fill,
            geometry_column: args.layer.geometry_column.clone(),
            crs: args.layer.crs.clone(),
            centroid: args.centroid,
            drop_empty_columns: args.drop_empty_columns,
        }
    }
}

impl MergeJob {
    pub fn loader_options(&self) -> Result<LoaderOptions> {
        loader_options(
            self.delimiter,
            self.input_encoding.as_deref(),
            self.sheet.clone(),
            self.forward_fill,
        )
    }

    pub fn layer_options(&self) -> LayerOptions {
        LayerOptions {
            geometry_column: self.geometry_column.clone(),
            crs: self.crs.clone(),
            delimiter: self.base_delimiter,
        }
    }

    fn label(&self) -> String {
        format!("{} + {}", self.base.display(), self.attributes.display())
    }

    /// Anchors relative paths at `dir`. Stdin/stdout dashes are left alone.
    fn resolve_paths(&mut self, dir: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() && !io_utils::is_dash(path.as_path()) {
                *path = dir.join(&*path);
            }
        };
        anchor(&mut self.base);
        anchor(&mut self.attributes);
        if let Some(output) = self.output.as_mut() {
            anchor(output);
        }
        if let Some(schema) = self.schema_out.as_mut() {
            anchor(schema);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchManifest {
    pub jobs: Vec<MergeJob>,
}

impl BatchManifest {
    /// Reads a manifest; relative paths in it are taken from the manifest's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening manifest {path:?}"))?;
        let mut manifest: BatchManifest = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing manifest {path:?}"))?;
        if manifest.jobs.is_empty() {
            bail!("Manifest {path:?} lists no jobs");
        }
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        for job in &mut manifest.jobs {
            job.resolve_paths(dir);
        }
        Ok(manifest)
    }
}

#[derive(Debug, Clone)]
pub struct JobReport {
    /// `None` when the layer went to stdout.
    pub output: Option<PathBuf>,
    pub schema: Option<PathBuf>,
    pub rows: usize,
    pub fields: Vec<SanitizedColumn>,
    pub summary: ReconcileSummary,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub completed: Vec<JobReport>,
    /// Zero-based job position and the reason it was skipped.
    pub skipped: Vec<(usize, anyhow::Error)>,
}

pub fn loader_options(
    delimiter: Option<u8>,
    encoding: Option<&str>,
    sheet: Option<String>,
    forward_fill: bool,
) -> Result<LoaderOptions> {
    let encoding = encoding.map(io_utils::resolve_encoding).transpose()?;
    Ok(LoaderOptions {
        delimiter,
        encoding,
        sheet,
        forward_fill,
    })
}

/// Loads an attribute table from a file or stdin. The kind comes from the
/// caller, then the extension, then the content.
pub fn read_attribute_table(
    path: &Path,
    kind: Option<InputKind>,
    options: &LoaderOptions,
) -> Result<ExternalTable> {
    let bytes = io_utils::read_input_bytes(path)?;
    let kind = kind.map(TableKind::from).or_else(|| TableKind::from_path(path));
    let mut options = options.clone();
    if options.delimiter.is_none()
        && io_utils::delimiter_for_path(path) == Some(io_utils::DEFAULT_TSV_DELIMITER)
    {
        options.delimiter = Some(io_utils::DEFAULT_TSV_DELIMITER);
    }
    let table = loader::load_table(&bytes, kind, &options)
        .with_context(|| format!("Loading attribute table {path:?}"))?;
    debug!(
        "Attribute table {:?}: {} column(s), {} row(s)",
        path,
        table.headers.len(),
        table.row_count()
    );
    Ok(table)
}

/// Default output for `base`, numbered when an earlier job already wrote there.
fn resolve_output(job: &MergeJob, store: &mut dyn KeyValueStore) -> PathBuf {
    if let Some(output) = &job.output {
        return output.clone();
    }
    let default = layer::default_output_path(&job.base);
    let key = format!("output_count:{}", default.display());
    let used = store
        .get(&key)
        .and_then(|count| count.parse::<usize>().ok())
        .unwrap_or(0);
    store.put(&key, (used + 1).to_string());
    if used == 0 {
        return default;
    }
    let stem = default
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("layer_merged");
    default.with_file_name(format!("{stem}_{used}.csv"))
}

pub fn run_job(job: &MergeJob, store: &mut dyn KeyValueStore) -> Result<JobReport> {
    let base = layer::read_feature_layer(&job.base, &job.layer_options())
        .with_context(|| format!("Reading base layer {:?}", job.base))?;
    let incoming = read_attribute_table(&job.attributes, job.kind, &job.loader_options()?)?;

    let (mut merged, summary) =
        reconcile_with_summary(&base, &incoming, &job.base_key, &job.attr_key)?;
    if job.centroid {
        merged = reduce_to_centroids(&merged);
    }
    if job.drop_empty_columns {
        merged = sanitize::drop_empty_columns(&merged);
    }
    let sanitized = sanitize::sanitize(&merged);

    let output = resolve_output(job, store);
    let to_stdout = io_utils::is_dash(&output);
    let delimiter = if to_stdout {
        io_utils::DEFAULT_CSV_DELIMITER
    } else {
        io_utils::delimiter_for_path(&output).unwrap_or(io_utils::DEFAULT_CSV_DELIMITER)
    };
    let rows = layer::write_layer(&sanitized, (!to_stdout).then_some(output.as_path()), delimiter)
        .with_context(|| format!("Writing layer {output:?}"))?;

    let schema_path = match (&job.schema_out, to_stdout) {
        (Some(path), _) => Some(path.clone()),
        (None, false) => Some(layer::schema_path_for(&output)),
        (None, true) => None,
    };
    if let Some(path) = &schema_path {
        let name = if to_stdout {
            String::new()
        } else {
            output
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string()
        };
        LayerSchema::describe(&layer::layer_name(&name), &sanitized)
            .save(path)
            .with_context(|| format!("Writing schema sidecar {path:?}"))?;
    }
    if !to_stdout {
        store.put(&format!("last_output:{}", job.base.display()), output.display().to_string());
    }

    info!(
        "Merged {}: {} matched, {} unmatched, {} duplicate key(s) ignored",
        job.label(),
        summary.matched_rows,
        summary.unmatched_rows,
        summary.duplicate_keys
    );
    if !summary.added_columns.is_empty() {
        info!("Added column(s): {}", summary.added_columns.iter().join(", "));
    }
    if !summary.overwritten_columns.is_empty() {
        info!(
            "Updated column(s): {} ({} cell(s) changed)",
            summary.overwritten_columns.iter().join(", "),
            summary.overwritten_cells
        );
    }
    if !summary.skipped_columns.is_empty() {
        warn!("Ignored column(s): {}", summary.skipped_columns.iter().join(", "));
    }

    Ok(JobReport {
        output: (!to_stdout).then_some(output),
        schema: schema_path,
        rows,
        fields: sanitized.columns,
        summary,
    })
}

/// Runs every job in order. Without `keep_going` the first failure ends the run.
pub fn run_batch(
    manifest: &BatchManifest,
    keep_going: bool,
    store: &mut dyn KeyValueStore,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for (idx, job) in manifest.jobs.iter().enumerate() {
        match run_job(job, store) {
            Ok(report) => outcome.completed.push(report),
            Err(err) if keep_going => {
                warn!("Skipping job {} ({}): {err:#}", idx + 1, job.label());
                outcome.skipped.push((idx, err));
            }
            Err(err) => {
                return Err(err.context(format!("Job {} ({}) failed", idx + 1, job.label())));
            }
        }
    }
    if outcome.completed.is_empty() {
        return Err(anyhow!("All {} job(s) failed", outcome.skipped.len()));
    }
    info!(
        "Batch finished: {} job(s) completed, {} skipped",
        outcome.completed.len(),
        outcome.skipped.len()
    );
    Ok(outcome)
}
