//! Tabular input loading: delimited text, pasted text and workbooks become an
//! [`ExternalTable`] of text cells.
//!
//! Values are never typed here. Type decisions belong to the sanitizer, which
//! sees the merged table as a whole.

use std::{io::Cursor, path::Path};

use anyhow::{Result, bail};
use calamine::{Data, ExcelDateTime, Reader, open_workbook_auto_from_rs};
use chrono::{NaiveTime, TimeDelta};
use encoding_rs::Encoding;
use log::{debug, warn};

use crate::{
    error::ReconcileError,
    io_utils::{self, printable_delimiter},
    model::ExternalTable,
    normalize::clean_header,
};

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const OLE_SIGNATURE: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";
const BINARY_PROBE_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Delimited,
    Spreadsheet,
    Pasted,
}

impl TableKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "tab" | "txt" => Some(TableKind::Delimited),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(TableKind::Spreadsheet),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Delimiter for delimited input; sniffed when `None`. Pasted text is always sniffed.
    pub delimiter: Option<u8>,
    /// Forces one encoding instead of the fallback chain.
    pub encoding: Option<&'static Encoding>,
    /// Worksheet name; the first sheet when `None`.
    pub sheet: Option<String>,
    pub forward_fill: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            delimiter: None,
            encoding: None,
            sheet: None,
            forward_fill: true,
        }
    }
}

/// Classifies raw bytes when the caller could not name a format.
pub fn sniff_kind(bytes: &[u8]) -> Result<TableKind, ReconcileError> {
    if bytes.starts_with(ZIP_SIGNATURE) || bytes.starts_with(OLE_SIGNATURE) {
        return Ok(TableKind::Spreadsheet);
    }
    let has_utf16_bom = bytes.starts_with(b"\xFF\xFE") || bytes.starts_with(b"\xFE\xFF");
    let probe = &bytes[..bytes.len().min(BINARY_PROBE_BYTES)];
    if !has_utf16_bom && probe.contains(&0) {
        return Err(ReconcileError::unsupported(
            "content is binary and not a recognised workbook",
        ));
    }
    Ok(TableKind::Delimited)
}

pub fn load_table(
    bytes: &[u8],
    kind: Option<TableKind>,
    options: &LoaderOptions,
) -> Result<ExternalTable, ReconcileError> {
    let kind = match kind {
        Some(kind) => kind,
        None => sniff_kind(bytes)?,
    };
    debug!("Loading {} byte(s) as {:?}", bytes.len(), kind);
    let records = match kind {
        TableKind::Spreadsheet => read_workbook(bytes, options)?,
        TableKind::Delimited | TableKind::Pasted => {
            let decoded = io_utils::decode_text(bytes, options.encoding);
            if decoded.lossy {
                warn!(
                    "Replaced undecodable bytes while reading input as {}",
                    decoded.encoding
                );
            } else {
                debug!("Decoded input as {}", decoded.encoding);
            }
            let delimiter = match (kind, options.delimiter) {
                (TableKind::Delimited, Some(delimiter)) => delimiter,
                _ => io_utils::sniff_delimiter(&decoded.text),
            };
            read_delimited(&decoded.text, delimiter)?
        }
    };
    assemble(records, options)
}

/// Loads text pasted straight from a spreadsheet or document.
pub fn load_pasted(text: &str, options: &LoaderOptions) -> Result<ExternalTable, ReconcileError> {
    let delimiter = io_utils::sniff_delimiter(text);
    let records = read_delimited(text, delimiter)?;
    assemble(records, options)
}

fn read_delimited(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>, ReconcileError> {
    debug!("Parsing delimited text with '{}'", printable_delimiter(delimiter));
    let mut reader = io_utils::open_csv_reader(text.as_bytes(), delimiter);
    let mut records = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|err| {
            ReconcileError::unsupported(format!("line {} is not delimited text: {err}", idx + 1))
        })?;
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok(records)
}

fn read_workbook(bytes: &[u8], options: &LoaderOptions) -> Result<Vec<Vec<String>>, ReconcileError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|err| ReconcileError::unsupported(format!("unreadable workbook: {err}")))?;
    let sheet_names = workbook.sheet_names();
    let sheet = match &options.sheet {
        Some(wanted) => sheet_names
            .iter()
            .find(|name| *name == wanted)
            .cloned()
            .ok_or_else(|| {
                ReconcileError::unsupported(format!(
                    "worksheet '{wanted}' not found (available: {})",
                    sheet_names.join(", ")
                ))
            })?,
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| ReconcileError::empty("workbook has no worksheets"))?,
    };
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|err| ReconcileError::unsupported(format!("worksheet '{sheet}': {err}")))?;
    debug!("Reading worksheet '{sheet}' ({} row(s))", range.height());
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_text).collect())
        .collect())
}

pub(crate) fn cell_to_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => excel_datetime_text(dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

/// Serials past this many days are not dates any workbook meant to store.
const MAX_SERIAL_DAYS: f64 = 3_000_000.0;

fn excel_datetime_text(dt: &ExcelDateTime) -> String {
    let serial = dt.as_f64();
    if !serial.is_finite() || serial.abs() > MAX_SERIAL_DAYS {
        warn!("Keeping out-of-range date serial {serial} as a number");
        return serial.to_string();
    }
    if dt.is_duration() {
        return match dt.as_duration() {
            Some(duration) => duration_text(duration),
            None => serial.to_string(),
        };
    }
    match dt.as_datetime() {
        Some(stamp) if stamp.time() == NaiveTime::MIN => stamp.format("%Y-%m-%d").to_string(),
        Some(stamp) => stamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => serial.to_string(),
    }
}

fn duration_text(duration: TimeDelta) -> String {
    let total = duration.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.unsigned_abs();
    format!(
        "{sign}{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

fn assemble(
    mut records: Vec<Vec<String>>,
    options: &LoaderOptions,
) -> Result<ExternalTable, ReconcileError> {
    while records.first().is_some_and(|row| is_blank_row(row)) {
        records.remove(0);
    }
    if records.is_empty() {
        return Err(ReconcileError::empty("input has no header row"));
    }
    let mut rows = records.split_off(1);
    let mut headers = records
        .into_iter()
        .next()
        .unwrap_or_default()
        .iter()
        .map(|name| clean_header(name))
        .collect::<Vec<_>>();

    let width = rows
        .iter()
        .map(|row| {
            let mut len = row.len();
            while len > headers.len() && row[len - 1].trim().is_empty() {
                len -= 1;
            }
            len
        })
        .max()
        .unwrap_or(0);
    if width > headers.len() {
        warn!(
            "Attribute rows carry {} more cell(s) than the header; naming them field_N",
            width - headers.len()
        );
        for idx in headers.len()..width {
            headers.push(format!("field_{}", idx + 1));
        }
    }
    for row in rows.iter_mut() {
        row.resize(headers.len(), String::new());
    }

    let mut table = ExternalTable::new(headers, rows);
    let before = table.row_count();
    drop_empty_rows(&mut table);
    if before != table.row_count() {
        debug!("Dropped {} empty row(s)", before - table.row_count());
    }
    if table.rows.is_empty() {
        return Err(ReconcileError::empty(
            "every row is empty once blank rows are removed",
        ));
    }
    if options.forward_fill {
        table = forward_fill(table);
    }
    Ok(table)
}

/// Removes rows whose cells are all empty or whitespace.
pub fn drop_empty_rows(table: &mut ExternalTable) {
    table.rows.retain(|row| !is_blank_row(row));
}

/// Fills empty cells from the nearest non-empty cell above in the same column,
/// the layout spreadsheets use for grouped rows. A malformed table comes back
/// unchanged.
pub fn forward_fill(mut table: ExternalTable) -> ExternalTable {
    match try_forward_fill(&mut table) {
        Ok(filled) => {
            if filled > 0 {
                debug!("Forward-filled {filled} empty cell(s)");
            }
        }
        Err(err) => warn!("Skipping forward fill: {err:#}"),
    }
    table
}

fn try_forward_fill(table: &mut ExternalTable) -> Result<usize> {
    table.validate()?;
    if table.rows.iter().any(|row| row.len() != table.headers.len()) {
        bail!("rows do not all span {} column(s)", table.headers.len());
    }
    let mut last: Vec<Option<String>> = vec![None; table.headers.len()];
    let mut filled = 0usize;
    for row in table.rows.iter_mut() {
        for (idx, cell) in row.iter_mut().enumerate() {
            if cell.trim().is_empty() {
                if let Some(previous) = &last[idx] {
                    *cell = previous.clone();
                    filled += 1;
                }
            } else {
                last[idx] = Some(cell.clone());
            }
        }
    }
    Ok(filled)
}
