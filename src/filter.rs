use crate::models::{DisplayRow, Record, RecordField};

/// Case-insensitive substring match over every column, the due date in its
/// file format included. An empty term matches everything.
pub fn matches(record: &Record, term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    RecordField::ALL
        .iter()
        .any(|field| record.field_text(*field).to_lowercase().contains(&needle))
}

/// Separators always stay visible so groups keep their boundaries.
pub fn row_matches(row: &DisplayRow, term: &str) -> bool {
    match row {
        DisplayRow::Item(entry) => matches(&entry.record, term),
        DisplayRow::Separator(_) => true,
    }
}

pub fn filter_rows(rows: &[DisplayRow], term: &str) -> Vec<DisplayRow> {
    rows.iter().filter(|row| row_matches(row, term)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DueDate, Separator};

    fn sample() -> Record {
        Record {
            customer: "Acme Pumps".to_string(),
            serial_number: "SN-4411".to_string(),
            due_date: DueDate::parse("05/01/2025"),
            status: "Booked In".to_string(),
            parts: "Mech seal".to_string(),
            ..Record::default()
        }
    }

    #[test]
    fn matches_any_field_ignoring_case() {
        let record = sample();
        assert!(matches(&record, "acme"));
        assert!(matches(&record, "sn-44"));
        assert!(matches(&record, "BOOKED"));
        assert!(matches(&record, "SEAL"));
        assert!(!matches(&record, "impeller"));
    }

    #[test]
    fn matches_formatted_due_date() {
        assert!(matches(&sample(), "05/01"));
        assert!(!matches(&sample(), "2024"));
    }

    #[test]
    fn empty_term_and_separators_always_match() {
        assert!(matches(&sample(), "   "));
        let separator = DisplayRow::Separator(Separator {
            label: "05/01/2025".to_string(),
        });
        assert!(row_matches(&separator, "nothing like it"));
    }
}
