//! Plain-text grids for the `preview` and `keys` commands.

use std::borrow::Cow;
use std::fmt::Write as _;

/// Longest cell shown before it is cut with an ellipsis.
pub const MAX_CELL_CHARS: usize = 40;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let headers = headers.iter().map(|h| display_cell(h)).collect::<Vec<_>>();
    let rows = rows
        .iter()
        .map(|row| {
            let mut cells = row
                .iter()
                .take(headers.len())
                .map(|cell| display_cell(cell))
                .collect::<Vec<_>>();
            cells.resize(headers.len(), String::new());
            cells
        })
        .collect::<Vec<_>>();

    let mut widths = headers
        .iter()
        .map(|h| h.chars().count().max(3))
        .collect::<Vec<_>>();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(&headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in &rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{value:<width$}"))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn display_cell(value: &str) -> String {
    let flat = flatten_whitespace(value);
    if flat.chars().count() <= MAX_CELL_CHARS {
        return flat.into_owned();
    }
    let mut cut = flat.chars().take(MAX_CELL_CHARS - 1).collect::<String>();
    cut.push('…');
    cut
}

fn flatten_whitespace(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
