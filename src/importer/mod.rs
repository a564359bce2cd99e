mod bnp;
mod boursorama;
mod revolut;

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::error::{Result, TallyError};
use crate::models::RawTransaction;

// ---------------------------------------------------------------------------
// Format description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoding {
    /// Windows-1252, lossy UTF-8 when the payload uses bytes 1252 leaves undefined.
    Windows1252,
    /// Strict UTF-8, latin-1 when that fails.
    Utf8OrLatin1,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecimalConvention {
    /// `1.234,56`
    Comma,
    /// `1,234.56`
    Dot,
}

#[derive(Debug, Clone, Copy)]
pub struct BankFormat {
    pub encoding: Encoding,
    pub delimiter: u8,
    pub header_skip: usize,
    pub required: &'static [&'static str],
    pub date_formats: &'static [&'static str],
    pub decimal: DecimalConvention,
}

// ---------------------------------------------------------------------------
// Bank kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankKind {
    Bnp,
    Boursorama,
    Revolut,
}

impl BankKind {
    /// Tag stored on every row; doubles as the derived account id.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Bnp => "BNP",
            Self::Boursorama => "Boursorama",
            Self::Revolut => "Revolut",
        }
    }

    pub fn format(&self) -> &'static BankFormat {
        match self {
            Self::Bnp => &bnp::FORMAT,
            Self::Boursorama => &boursorama::FORMAT,
            Self::Revolut => &revolut::FORMAT,
        }
    }

    pub fn detect(&self, bytes: &[u8]) -> bool {
        let fmt = self.format();
        let text = decode(bytes, fmt.encoding);
        let Some(header) = text.lines().nth(fmt.header_skip) else {
            return false;
        };
        let delimiter = char::from(fmt.delimiter);
        header.contains(delimiter) && header.contains(fmt.required[0])
    }

    pub fn parse(&self, bytes: &[u8]) -> Result<Vec<RawTransaction>> {
        let table = read_table(*self, bytes)?;
        let rows = match self {
            Self::Bnp => bnp::rows(&table),
            Self::Boursorama => boursorama::rows(&table),
            Self::Revolut => revolut::rows(&table),
        };
        tracing::debug!(bank = self.key(), rows = rows.len(), "parsed export");
        Ok(rows)
    }
}

impl std::str::FromStr for BankKind {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        ALL_BANKS
            .iter()
            .find(|b| b.key().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| TallyError::UnknownBank(s.to_string()))
    }
}

pub const ALL_BANKS: &[BankKind] = &[BankKind::Bnp, BankKind::Boursorama, BankKind::Revolut];

pub fn detect_bank(bytes: &[u8]) -> Option<BankKind> {
    ALL_BANKS.iter().find(|b| b.detect(bytes)).copied()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

// 0x80..=0x9F; `None` marks the five bytes Windows-1252 leaves undefined.
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

fn decode_cp1252(bytes: &[u8]) -> Option<String> {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
            _ => Some(char::from(b)),
        })
        .collect()
}

pub fn decode(bytes: &[u8], encoding: Encoding) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match encoding {
        Encoding::Windows1252 => decode_cp1252(bytes)
            .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned()),
        Encoding::Utf8OrLatin1 => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
        },
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

pub fn parse_amount(raw: &str, decimal: DecimalConvention) -> f64 {
    let mut s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return 0.0;
    }
    match decimal {
        DecimalConvention::Comma => {
            if s.contains(',') && s.contains('.') {
                s = s.replace('.', "").replace(',', ".");
            } else if s.contains(',') {
                s = s.replace(',', ".");
            }
        }
        DecimalConvention::Dot => s = s.replace(',', ""),
    }
    if let Some(v) = parse_finite(&s) {
        return v;
    }
    let stripped: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    parse_finite(&stripped).unwrap_or(0.0)
}

fn parse_finite(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

static CARD_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CARD\s*\d+/\d+/\d+").expect("static regex"));
static REF_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"REF[:\s]*\d+").expect("static regex"));

const MERCHANT_MAX_CHARS: usize = 50;

/// Display-oriented merchant token: uppercased, whitespace collapsed, card
/// terminal references removed, bounded length.
pub fn extract_merchant(description: &str) -> String {
    let upper = description.to_uppercase();
    let collapsed = upper.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = CARD_TOKEN.replace_all(&collapsed, "");
    let cleaned = REF_TOKEN.replace_all(&cleaned, "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    cleaned.chars().take(MERCHANT_MAX_CHARS).collect()
}

/// Tries each format in order; date-only formats land at midnight.
pub fn parse_timestamp(raw: &str, formats: &[&str]) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    formats.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt).ok().or_else(|| {
            NaiveDate::parse_from_str(raw, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    })
}

// ---------------------------------------------------------------------------
// CSV table
// ---------------------------------------------------------------------------

/// A decoded export with its header resolved to column positions.
pub(crate) struct Table {
    pub bank: BankKind,
    columns: HashMap<String, usize>,
    records: Vec<csv::StringRecord>,
}

impl Table {
    pub fn records(&self) -> impl Iterator<Item = Row<'_>> {
        self.records.iter().map(move |record| Row { table: self, record })
    }

    pub fn format(&self) -> &'static BankFormat {
        self.bank.format()
    }
}

pub(crate) struct Row<'a> {
    table: &'a Table,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    /// Trimmed cell value; empty when the column or cell is absent.
    pub fn get(&self, column: &str) -> &str {
        self.table
            .columns
            .get(column)
            .and_then(|&i| self.record.get(i))
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn get_or<'b>(&'b self, column: &str, default: &'b str) -> &'b str {
        match self.get(column) {
            "" => default,
            v => v,
        }
    }

    pub fn amount(&self, column: &str) -> f64 {
        parse_amount(self.get(column), self.table.format().decimal)
    }

    pub fn optional_amount(&self, column: &str) -> Option<String> {
        match self.get(column) {
            "" => None,
            v => Some(parse_amount(v, self.table.format().decimal).to_string()),
        }
    }

    /// Parsed timestamp of `column`, or `None` (logged) when the row must be skipped.
    pub fn timestamp(&self, column: &str) -> Option<NaiveDateTime> {
        let raw = self.get(column);
        if raw.is_empty() {
            return None;
        }
        let ts = parse_timestamp(raw, self.table.format().date_formats);
        if ts.is_none() {
            tracing::warn!(bank = self.table.bank.key(), date = raw, "unparsable date, skipping row");
        }
        ts
    }
}

fn clean_header(name: &str) -> String {
    name.replace('\u{feff}', "")
        .replace("\u{ef}\u{bb}\u{bf}", "")
        .trim()
        .to_string()
}

/// Unreadable records are skipped and logged; the rest of the file still imports.
fn readable_record(
    bank: BankKind,
    result: std::result::Result<csv::StringRecord, csv::Error>,
) -> Option<csv::StringRecord> {
    match result {
        Ok(record) => Some(record),
        Err(e) => {
            let line = e.position().map(|p| p.line());
            tracing::warn!(bank = bank.key(), ?line, error = %e, "skipping unreadable CSV record");
            None
        }
    }
}

fn read_table(bank: BankKind, bytes: &[u8]) -> Result<Table> {
    let fmt = bank.format();
    let text = decode(bytes, fmt.encoding);

    let body = if fmt.header_skip > 0 {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() <= fmt.header_skip {
            return Err(TallyError::MissingColumns {
                bank: bank.key().to_string(),
                missing: fmt.required.iter().map(|c| c.to_string()).collect(),
            });
        }
        lines[fmt.header_skip..].join("\n")
    } else {
        text
    };

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(fmt.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let columns: HashMap<String, usize> = rdr
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (clean_header(name), i))
        .collect();

    let missing: Vec<String> = fmt
        .required
        .iter()
        .filter(|c| !columns.contains_key(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        tracing::warn!(bank = bank.key(), ?missing, "required columns absent");
        return Err(TallyError::MissingColumns {
            bank: bank.key().to_string(),
            missing,
        });
    }

    let records = rdr
        .records()
        .filter_map(|result| readable_record(bank, result))
        .collect();

    Ok(Table {
        bank,
        columns,
        records,
    })
}
