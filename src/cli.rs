use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::loader::TableKind;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fill feature layer attributes from spreadsheets and delimited tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Join an attribute table onto a base layer and write a sanitized layer
    Merge(MergeArgs),
    /// Run several merges described in a YAML manifest
    Batch(BatchArgs),
    /// Suggest join-key pairs whose column names match once normalized
    Keys(KeysArgs),
    /// Show the first rows of an attribute table as it will be joined
    Preview(PreviewArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Deserialize)]
#[value(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    Delimited,
    Spreadsheet,
    /// Free text copied from a spreadsheet or document
    Text,
}

impl From<InputKind> for TableKind {
    fn from(kind: InputKind) -> Self {
        match kind {
            InputKind::Delimited => TableKind::Delimited,
            InputKind::Spreadsheet => TableKind::Spreadsheet,
            InputKind::Text => TableKind::Pasted,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct AttributeSourceArgs {
    /// Attribute table (.csv, .tsv, .txt, .xlsx, .xls, .ods, or '-' for stdin)
    #[arg(short = 'a', long = "attributes")]
    pub attributes: PathBuf,
    /// Input kind; inferred from the extension or content when omitted
    #[arg(long, value_enum)]
    pub kind: Option<InputKind>,
    /// Attribute table delimiter (supports ',', 'tab', ';', '|'); sniffed when omitted
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the attribute table; tries utf-8-sig, utf-16, utf-8, latin-1 when omitted
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Worksheet to read from a workbook (defaults to the first sheet)
    #[arg(long)]
    pub sheet: Option<String>,
    /// Keep empty cells empty instead of filling them from the row above
    #[arg(long = "no-forward-fill")]
    pub no_forward_fill: bool,
}

#[derive(Debug, Clone, Args)]
pub struct BaseLayerArgs {
    /// Base layer as delimited text with a WKT geometry column
    #[arg(short = 'b', long = "base")]
    pub base: PathBuf,
    /// Name of the geometry column in the base layer
    #[arg(long = "geometry-column", default_value = "geometry")]
    pub geometry_column: String,
    /// Coordinate reference system identifier recorded with the output (e.g. EPSG:4326)
    #[arg(long)]
    pub crs: Option<String>,
    /// Base layer delimiter; inferred from the extension or sniffed when omitted
    #[arg(long = "base-delimiter", value_parser = parse_delimiter)]
    pub base_delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    #[command(flatten)]
    pub layer: BaseLayerArgs,
    #[command(flatten)]
    pub source: AttributeSourceArgs,
    /// Join column in the base layer
    #[arg(long = "base-key")]
    pub base_key: String,
    /// Join column in the attribute table
    #[arg(long = "attr-key")]
    pub attr_key: String,
    /// Output layer file (defaults to <base>_merged.csv; '-' for stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Schema sidecar path (defaults to the output path with .schema.yml)
    #[arg(long = "schema-out")]
    pub schema_out: Option<PathBuf>,
    /// Replace each geometry with its centroid
    #[arg(long)]
    pub centroid: bool,
    /// Remove attribute columns that hold no values at all
    #[arg(long = "drop-empty-columns")]
    pub drop_empty_columns: bool,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// YAML manifest listing merge jobs
    #[arg(short = 'm', long = "manifest")]
    pub manifest: PathBuf,
    /// Skip failing jobs instead of stopping at the first failure
    #[arg(long = "keep-going")]
    pub keep_going: bool,
}

#[derive(Debug, Args)]
pub struct KeysArgs {
    #[command(flatten)]
    pub layer: BaseLayerArgs,
    #[command(flatten)]
    pub source: AttributeSourceArgs,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub source: AttributeSourceArgs,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
