//! Byte-level helpers shared by the loader and the layer writer.
//!
//! - **Decoding**: a fixed fallback chain (`utf-8-sig`, `utf-16` with BOM,
//!   `utf-8`, `latin-1`) via `encoding_rs`, ending in lossy UTF-8 rather than
//!   an error.
//! - **Delimiters**: extension defaults (`.tsv` -> tab) and a sniffer over the
//!   first 10 KB for free text.
//! - **Reader/writer construction**: `csv` readers that tolerate ragged rows,
//!   and writers that quote every field.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.

use std::{
    borrow::Cow,
    fs::File,
    io::{BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, WINDOWS_1252};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';
pub const SNIFF_SAMPLE_BYTES: usize = 10 * 1024;

const SNIFF_MAX_LINES: usize = 50;
const DELIMITER_CANDIDATES: [u8; 4] = [b'\t', b',', b';', b'|'];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| anyhow!("Unknown encoding '{label}'"))
}

/// Delimiter implied by the file extension, if any.
pub fn delimiter_for_path(path: &Path) -> Option<u8> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("tab") => {
            Some(DEFAULT_TSV_DELIMITER)
        }
        Some(ext) if ext.eq_ignore_ascii_case("csv") => Some(DEFAULT_CSV_DELIMITER),
        _ => None,
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    /// Label of the encoding that produced `text`.
    pub encoding: &'static str,
    /// True when invalid sequences were replaced.
    pub lossy: bool,
}

impl DecodedText {
    fn exact(text: Cow<'_, str>, encoding: &'static str) -> Self {
        DecodedText {
            text: text.into_owned(),
            encoding,
            lossy: false,
        }
    }
}

/// Decodes delimited text. A forced encoding decodes with replacement; otherwise
/// the fallback chain runs until one decoder accepts the bytes.
pub fn decode_text(bytes: &[u8], forced: Option<&'static Encoding>) -> DecodedText {
    if let Some(encoding) = forced {
        let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
        return DecodedText {
            text: text.into_owned(),
            encoding: encoding.name(),
            lossy: had_errors,
        };
    }

    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        if let Ok(text) = std::str::from_utf8(rest) {
            return DecodedText::exact(Cow::Borrowed(text), "utf-8-sig");
        }
    }

    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        if encoding == UTF_16LE || encoding == UTF_16BE {
            if let Some(text) =
                encoding.decode_without_bom_handling_and_without_replacement(&bytes[bom_len..])
            {
                return DecodedText::exact(text, "utf-16");
            }
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText::exact(Cow::Borrowed(text), "utf-8");
    }

    if let Some(text) = WINDOWS_1252.decode_without_bom_handling_and_without_replacement(bytes) {
        return DecodedText::exact(text, "latin-1");
    }

    DecodedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        encoding: "utf-8",
        lossy: true,
    }
}

fn bounded_sample(text: &str, limit: usize) -> (&str, bool) {
    if text.len() <= limit {
        return (text, false);
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], true)
}

fn count_unquoted(record: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0usize;
    for byte in record.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if byte == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Splits text into records at newlines outside quotes, so a quoted cell
/// spanning several lines stays in one record.
fn split_records(text: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0usize;
    for (idx, byte) in text.bytes().enumerate() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                records.push(text[start..idx].trim_end_matches('\r'));
                start = idx + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        records.push(&text[start..]);
    }
    records
}

/// Picks the delimiter among tab, comma, semicolon and pipe whose per-record
/// count is non-zero and identical on every sampled record, preferring the
/// highest count. Falls back to tab when one appears at all, else comma.
pub fn sniff_delimiter(text: &str) -> u8 {
    let (sample, truncated) = bounded_sample(text, SNIFF_SAMPLE_BYTES);
    let mut lines = split_records(sample)
        .into_iter()
        .filter(|record| !record.trim().is_empty())
        .take(SNIFF_MAX_LINES)
        .collect::<Vec<_>>();
    if truncated && lines.len() > 1 {
        lines.pop();
    }

    let mut best: Option<(u8, usize)> = None;
    if !lines.is_empty() {
        for candidate in DELIMITER_CANDIDATES {
            let first = count_unquoted(lines[0], candidate);
            if first == 0 {
                continue;
            }
            let consistent = lines
                .iter()
                .all(|line| count_unquoted(line, candidate) == first);
            if consistent && best.is_none_or(|(_, count)| first > count) {
                best = Some((candidate, first));
            }
        }
    }

    match best {
        Some((delimiter, _)) => delimiter,
        None if sample.contains('\t') => DEFAULT_TSV_DELIMITER,
        None => DEFAULT_CSV_DELIMITER,
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn read_input_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if is_dash(path) {
        std::io::stdin()
            .lock()
            .read_to_end(&mut bytes)
            .context("Reading stdin")?;
    } else {
        File::open(path)
            .with_context(|| format!("Opening input file {path:?}"))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("Reading input file {path:?}"))?;
    }
    Ok(bytes)
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };

    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    Ok(builder.from_writer(writer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_strips_utf8_bom() {
        let decoded = decode_text(b"\xEF\xBB\xBFid,name\n1,a\n", None);
        assert_eq!(decoded.encoding, "utf-8-sig");
        assert_eq!(decoded.text, "id,name\n1,a\n");
    }

    #[test]
    fn decode_reads_utf16_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "id\tname\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let decoded = decode_text(&bytes, None);
        assert_eq!(decoded.encoding, "utf-16");
        assert_eq!(decoded.text, "id\tname\n");
    }

    #[test]
    fn decode_falls_back_to_latin1() {
        let decoded = decode_text(b"name\nCaf\xE9\n", None);
        assert_eq!(decoded.encoding, "latin-1");
        assert_eq!(decoded.text, "name\nCaf\u{e9}\n");
        assert!(!decoded.lossy);
    }

    #[test]
    fn forced_encoding_replaces_invalid_bytes() {
        let decoded = decode_text(b"ok\xFF", Some(encoding_rs::UTF_8));
        assert!(decoded.lossy);
        assert_eq!(decoded.text, "ok\u{FFFD}");
    }

    #[test]
    fn sniff_prefers_consistent_delimiter() {
        assert_eq!(sniff_delimiter("a;b;c\n1;2;3\n4;5;6\n"), b';');
        assert_eq!(sniff_delimiter("a|b\n1|2\n"), b'|');
        assert_eq!(sniff_delimiter("id,name\n1,\"Doe; John\"\n"), b',');
    }

    #[test]
    fn sniff_keeps_multiline_quoted_cells_in_one_record() {
        let text = "id;note\r\n1;\"line one\nline two\"\r\n2;plain\r\n";
        assert_eq!(sniff_delimiter(text), b';');
        assert_eq!(
            split_records(text),
            vec!["id;note", "1;\"line one\nline two\"", "2;plain"]
        );
    }

    #[test]
    fn sniff_defaults_to_tab_then_comma() {
        assert_eq!(sniff_delimiter("a\tb\nsingle\n"), b'\t');
        assert_eq!(sniff_delimiter("just one column\nvalue\n"), b',');
    }

    #[test]
    fn sniff_ignores_partial_trailing_line_in_large_samples() {
        let mut text = String::from("id;name\n");
        while text.len() < SNIFF_SAMPLE_BYTES + 100 {
            text.push_str("1;abc\n");
        }
        text.push_str("tail,with,commas\n");
        assert_eq!(sniff_delimiter(&text), b';');
    }

    #[test]
    fn extension_defaults() {
        assert_eq!(delimiter_for_path(Path::new("a.TSV")), Some(b'\t'));
        assert_eq!(delimiter_for_path(Path::new("a.csv")), Some(b','));
        assert_eq!(delimiter_for_path(Path::new("a.txt")), None);
    }
}
