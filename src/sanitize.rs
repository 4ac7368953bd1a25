//! Schema sanitization for GeoPackage output.
//!
//! Every attribute column comes out with a name of at most 254 characters that
//! is unique under [`normalize_column_name`], and with one of the field types a
//! GeoPackage feature table can store. Sanitizing never fails: anything that
//! cannot be typed becomes text. Running it on its own output changes nothing.

use std::{collections::HashSet, fmt};

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{DATE_FORMAT, DATETIME_FORMAT, Value},
    model::{Cell, FeatureTable},
    normalize::{clean_header, normalize_column_name},
};

pub const MAX_FIELD_NAME_CHARS: usize = 254;
const FALLBACK_FIELD_NAME: &str = "column";
const ISO_DATETIME_T_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
    Date,
    DateTime,
}

impl FieldType {
    /// Column type name as declared in a GeoPackage feature table.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
        }
    }

    fn of(value: &Value) -> FieldType {
        match value {
            Value::Integer(_) => FieldType::Integer,
            Value::Float(_) => FieldType::Real,
            Value::Boolean(_) => FieldType::Boolean,
            Value::Date(_) => FieldType::Date,
            Value::DateTime(_) => FieldType::DateTime,
            _ => FieldType::Text,
        }
    }

    fn widen(self, other: FieldType) -> FieldType {
        use FieldType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Real) | (Real, Integer) => Real,
            (Date, DateTime) | (DateTime, Date) => DateTime,
            _ => Text,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedColumn {
    pub name: String,
    pub field_type: FieldType,
}

/// A layer ready to persist. `table.columns` mirrors the names in `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedTable {
    pub columns: Vec<SanitizedColumn>,
    pub table: FeatureTable,
}

impl SanitizedTable {
    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.field_type)
    }

    pub fn into_table(self) -> FeatureTable {
        self.table
    }
}

pub fn sanitize(table: &FeatureTable) -> SanitizedTable {
    let names = sanitize_names(&table.columns, &table.geometry_column);
    let mut rows: Vec<Vec<Cell>> = vec![Vec::with_capacity(names.len()); table.row_count()];
    let mut columns = Vec::with_capacity(names.len());

    for (idx, name) in names.into_iter().enumerate() {
        let (field_type, values) = sanitize_column(table, idx);
        if field_type == FieldType::Text && values.iter().all(Option::is_none) {
            debug!("Column '{name}' holds no values; keeping it as nullable text");
        }
        for (row, value) in rows.iter_mut().zip(values) {
            row.push(value);
        }
        columns.push(SanitizedColumn { name, field_type });
    }

    SanitizedTable {
        table: FeatureTable {
            columns: columns.iter().map(|c| c.name.clone()).collect(),
            rows,
            geometry_column: table.geometry_column.clone(),
            geometries: table.geometries.clone(),
            crs: table.crs.clone(),
        },
        columns,
    }
}

/// Truncates, cleans and de-duplicates names. The geometry column name is
/// reserved so no attribute can shadow it.
pub fn sanitize_names(columns: &[String], geometry_column: &str) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    used.insert(normalize_column_name(geometry_column));
    let mut names = Vec::with_capacity(columns.len());

    for original in columns {
        let cleaned = clean_header(original);
        let cleaned = if cleaned.trim().is_empty() {
            FALLBACK_FIELD_NAME.to_string()
        } else {
            cleaned
        };
        let base = truncate_chars(&cleaned, MAX_FIELD_NAME_CHARS);
        let mut candidate = base.to_string();
        let mut suffix = 1usize;
        while used.contains(&normalize_column_name(&candidate)) {
            let tail = format!("_{suffix}");
            let room = MAX_FIELD_NAME_CHARS - tail.chars().count();
            candidate = format!("{}{tail}", truncate_chars(base, room));
            suffix += 1;
        }
        if &candidate != original {
            debug!("Renamed column '{original}' to '{candidate}'");
        }
        used.insert(normalize_column_name(&candidate));
        names.push(candidate);
    }
    names
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn sanitize_column(table: &FeatureTable, column: usize) -> (FieldType, Vec<Cell>) {
    let plain: Vec<Cell> = table
        .column_values(column)
        .map(|cell| cell.and_then(coerce_value))
        .collect();
    let promoted: Vec<Cell> = plain
        .iter()
        .map(|cell| cell.as_ref().map(promote_text))
        .collect();

    let field_type = promoted
        .iter()
        .flatten()
        .map(FieldType::of)
        .reduce(FieldType::widen)
        .unwrap_or(FieldType::Text);

    let values = match field_type {
        // Text columns keep the text as it arrived, not a re-rendered promotion.
        FieldType::Text => plain
            .into_iter()
            .map(|cell| cell.map(|value| Value::Text(value.as_display())))
            .collect(),
        FieldType::Real => promoted
            .into_iter()
            .map(|cell| {
                cell.map(|value| match value {
                    Value::Integer(i) => Value::Float(i as f64),
                    other => other,
                })
            })
            .collect(),
        FieldType::DateTime => promoted
            .into_iter()
            .map(|cell| {
                cell.map(|value| match value {
                    Value::Date(d) => d
                        .and_hms_opt(0, 0, 0)
                        .map(Value::DateTime)
                        .unwrap_or(Value::Date(d)),
                    other => other,
                })
            })
            .collect(),
        _ => promoted,
    };
    (field_type, values)
}

/// Reduces a value to something a GeoPackage column can hold. Blank text and
/// NaN become null.
pub fn coerce_value(value: &Value) -> Option<Value> {
    let coerced = match value {
        Value::Text(s) => Value::Text(s.clone()),
        Value::Float(f) if f.is_nan() => return None,
        Value::Integer(_)
        | Value::Float(_)
        | Value::Boolean(_)
        | Value::Date(_)
        | Value::DateTime(_) => value.clone(),
        Value::DateTimeTz(dt) => Value::DateTime(dt.naive_local()),
        Value::Duration(delta) => Value::Text(delta.to_string()),
        Value::Bytes(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        Value::List(_) | Value::Map(_) => Value::Text(
            serde_json::to_string(&value.to_json()).unwrap_or_else(|_| format!("{value:?}")),
        ),
    };
    if coerced.is_blank() { None } else { Some(coerced) }
}

/// Numbers and dates are typed only when rendering them gives back the exact
/// same text, so `007`, `1.50` or ` 12` stay text. Booleans ignore case.
fn promote_text(value: &Value) -> Value {
    let Value::Text(text) = value else {
        return value.clone();
    };
    if let Ok(parsed) = text.parse::<i64>() {
        if parsed.to_string() == *text {
            return Value::Integer(parsed);
        }
    }
    if let Ok(parsed) = text.parse::<f64>() {
        if parsed.is_finite() && parsed.to_string() == *text {
            return Value::Float(parsed);
        }
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(text, DATE_FORMAT) {
        if parsed.format(DATE_FORMAT).to_string() == *text {
            return Value::Date(parsed);
        }
    }
    for format in [DATETIME_FORMAT, ISO_DATETIME_T_FORMAT] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            if parsed.format(format).to_string() == *text {
                return Value::DateTime(parsed);
            }
        }
    }
    value.clone()
}

/// Removes attribute columns without a single non-blank value. Sanitizing
/// never does this on its own.
pub fn drop_empty_columns(table: &FeatureTable) -> FeatureTable {
    let keep: Vec<usize> = (0..table.columns.len())
        .filter(|idx| {
            table
                .column_values(*idx)
                .any(|cell| cell.is_some_and(|value| !value.is_blank()))
        })
        .collect();
    if keep.len() != table.columns.len() {
        debug!(
            "Dropping {} empty column(s)",
            table.columns.len() - keep.len()
        );
    }
    FeatureTable {
        columns: keep.iter().map(|idx| table.columns[*idx].clone()).collect(),
        rows: table
            .rows
            .iter()
            .map(|row| keep.iter().map(|idx| row.get(*idx).cloned().flatten()).collect())
            .collect(),
        geometry_column: table.geometry_column.clone(),
        geometries: table.geometries.clone(),
        crs: table.crs.clone(),
    }
}
