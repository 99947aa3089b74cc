//! Delimited text codec for the record file.
//!
//! Header `component,event,day,count`, one row per record, `\n` line ends.
//! Fields holding a comma, quote or line break are double-quoted with quotes
//! doubled. The legacy header spelling `times` for the count column is
//! accepted on read, as are `\r\n` line ends and counts written as floats.
//! A row that would not pass record validation is a parse error.

use chrono::NaiveDate;

use crate::kernel::record::{AggregateRecord, DAY_FORMAT};

pub const HEADER: [&str; 4] = ["component", "event", "day", "count"];
const LEGACY_COUNT_COLUMN: &str = "times";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

pub fn encode(records: &[AggregateRecord]) -> String {
    let mut out = String::new();
    push_row(&mut out, HEADER);
    for record in records {
        let day = record.day.format(DAY_FORMAT).to_string();
        let count = record.count.to_string();
        push_row(&mut out, [&record.component, &record.event, &day, &count]);
    }
    out
}

pub fn decode(text: &str) -> Result<Vec<AggregateRecord>, ParseError> {
    let rows = split_rows(text)?;
    let mut rows = rows.into_iter();

    let Some((_, header)) = rows.next() else {
        // Zero-length file: treated as a fresh, empty store.
        return Ok(Vec::new());
    };
    let columns = column_order(&header).map_err(|message| ParseError { line: 1, message })?;

    let mut records = Vec::new();
    for (line, row) in rows {
        if row.len() == 1 && row[0].is_empty() {
            continue;
        }
        if row.len() != HEADER.len() {
            return Err(ParseError {
                line,
                message: format!("expected {} fields, found {}", HEADER.len(), row.len()),
            });
        }
        let field = |i: usize| row[columns[i]].as_str();
        let day = NaiveDate::parse_from_str(field(2), DAY_FORMAT).map_err(|e| ParseError {
            line,
            message: format!("bad day '{}': {e}", field(2)),
        })?;
        let count = parse_count(field(3)).ok_or_else(|| ParseError {
            line,
            message: format!("bad count '{}'", field(3)),
        })?;
        let record = AggregateRecord::new(field(0), field(1), day, count);
        record.validate().map_err(|e| ParseError {
            line,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Position of each canonical column in the file's header.
fn column_order(header: &[String]) -> Result<[usize; 4], String> {
    let mut order = [usize::MAX; 4];
    for (pos, name) in header.iter().enumerate() {
        let name = name.trim();
        let slot = match name {
            "component" => 0,
            "event" => 1,
            "day" => 2,
            "count" | LEGACY_COUNT_COLUMN => 3,
            other => return Err(format!("unexpected column '{other}'")),
        };
        if order[slot] != usize::MAX {
            return Err(format!("duplicate column '{name}'"));
        }
        order[slot] = pos;
    }
    if let Some(missing) = order.iter().position(|&p| p == usize::MAX) {
        return Err(format!("missing column '{}'", HEADER[missing]));
    }
    Ok(order)
}

fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    let f = raw.parse::<f64>().ok()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

fn push_row<S: AsRef<str>>(out: &mut String, fields: [S; 4]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, field.as_ref());
    }
    out.push('\n');
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Splits into rows of fields, tracking the 1-based line each row starts on.
fn split_rows(text: &str) -> Result<Vec<(usize, Vec<String>)>, ParseError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut row_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push((row_line, std::mem::take(&mut row)));
                line += 1;
                row_line = line;
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(ParseError {
            line: row_line,
            message: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push((row_line, row));
    }
    Ok(rows)
}
