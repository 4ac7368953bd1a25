//! Canonical comparison forms for column names and join-key values.
//!
//! Normalized strings are only ever compared, never displayed. The two
//! normalizers are independent: a column-name rule never leaks into value
//! matching and vice versa.

use std::collections::HashMap;

use crate::data::Value;

/// Zero-width marks, byte-order marks, soft hyphens and bidi controls that
/// spreadsheets and copy-paste carry along without showing them.
pub fn is_invisible(ch: char) -> bool {
    matches!(
        ch,
        '\u{00AD}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{FEFF}'
    )
}

/// Strips invisible characters from a header and turns non-breaking spaces
/// into plain ones, keeping case and spacing otherwise intact.
pub fn clean_header(name: &str) -> String {
    name.chars()
        .filter(|ch| !is_invisible(*ch))
        .map(|ch| if ch == '\u{00A0}' { ' ' } else { ch })
        .collect()
}

pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .filter(|ch| !is_invisible(*ch))
        .filter(|ch| !ch.is_whitespace())
        .filter(|ch| !matches!(ch, '_' | '-' | '(' | ')' | '/'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Underscores and hyphens act as separators, so `RW-001`, `rw 001` and
/// ` RW_001 ` all reduce to `rw 001`.
pub fn normalize_join_value(value: &str) -> String {
    let lowered = value
        .chars()
        .filter(|ch| !is_invisible(*ch))
        .map(|ch| if matches!(ch, '_' | '-') { ' ' } else { ch })
        .flat_map(char::to_lowercase)
        .collect::<String>();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join form of a typed cell; nulls normalize to the empty string.
pub fn normalize_cell(cell: Option<&Value>) -> String {
    match cell {
        Some(value) => normalize_join_value(&value.as_display()),
        None => String::new(),
    }
}

/// Column pairs `(base, incoming)` whose names denote the same attribute,
/// listed in base order. Each incoming column is suggested at most once.
pub fn suggest_key_pairs(base: &[String], incoming: &[String]) -> Vec<(String, String)> {
    let mut by_key: HashMap<String, &String> = HashMap::new();
    for name in incoming {
        by_key.entry(normalize_column_name(name)).or_insert(name);
    }
    let mut pairs = Vec::new();
    for name in base {
        let key = normalize_column_name(name);
        if key.is_empty() {
            continue;
        }
        if let Some(other) = by_key.remove(&key) {
            pairs.push((name.clone(), other.clone()));
        }
    }
    pairs
}
