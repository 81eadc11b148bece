use crate::models::{Record, RecordField};

pub const DELIMITER: char = ',';
const ALT_DELIMITER: char = ';';
pub const COLUMN_COUNT: usize = RecordField::ALL.len();

pub fn header_line() -> String {
    RecordField::ALL
        .iter()
        .map(|field| field.header())
        .collect::<Vec<_>>()
        .join(",")
}

/// Regional spreadsheet exports use `;` when `,` is the decimal mark.
fn detect_delimiter(line: &str) -> char {
    if line.contains(ALT_DELIMITER) && !line.contains(DELIMITER) {
        ALT_DELIMITER
    } else {
        DELIMITER
    }
}

/// Splits one logical line into raw fields. A quote toggles literal mode and a
/// doubled quote inside a literal yields one quote character.
pub fn split_fields(line: &str) -> Vec<String> {
    let delimiter = detect_delimiter(line);
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_literal = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_literal {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_literal = false;
                }
            } else {
                current.push(ch);
            }
        } else if ch == '"' {
            in_literal = true;
        } else if ch == delimiter {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    fields.push(current);
    fields
}

/// Never fails: short lines leave trailing fields empty, and a line with one
/// extra leading column (legacy export with an ID column) drops that column.
pub fn parse_line(line: &str) -> Record {
    let mut fields = split_fields(line);
    if fields.len() == COLUMN_COUNT + 1 {
        fields.remove(0);
    }

    let mut record = Record::default();
    for (field, raw) in RecordField::ALL.iter().zip(fields.iter()) {
        record.assign_column(*field, raw);
    }
    record
}

pub fn format_record(record: &Record) -> String {
    RecordField::ALL
        .iter()
        .map(|field| escape_field(&record.field_text(*field)))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn escape_field(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|ch| matches!(ch, DELIMITER | ALT_DELIMITER | '"' | '\n' | '\r'));
    if !needs_quotes {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Splits file text into records. A line break inside a quoted field belongs
/// to the field and is kept byte for byte, `\r\n` included; only the `\r` of a
/// record-ending `\r\n` is dropped.
pub fn logical_lines(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in text.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            '\n' if !in_quotes => {
                if current.ends_with('\r') {
                    current.pop();
                }
                out.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        tracing::warn!(chars = current.len(), "unterminated quoted field at end of file");
    } else if current.ends_with('\r') {
        current.pop();
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
