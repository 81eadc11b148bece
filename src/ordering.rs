use crate::lifecycle;
use crate::models::{DisplayRow, Entry, Record, Separator, Tier, DATE_FORMAT};
use chrono::NaiveDate;
use std::cmp::Ordering;

pub const NO_DATE_LABEL: &str = "No Date";

/// Grouping key for a record's due date. Unknown sorts after every known date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DateKey {
    Known(NaiveDate),
    Unknown,
}

impl DateKey {
    pub fn of(record: &Record) -> Self {
        match record.due_date.date() {
            Some(date) => Self::Known(date),
            None => Self::Unknown,
        }
    }

    pub fn label(self) -> String {
        match self {
            Self::Known(date) => date.format(DATE_FORMAT).to_string(),
            Self::Unknown => NO_DATE_LABEL.to_string(),
        }
    }
}

fn is_pinned(entry: &Entry) -> bool {
    lifecycle::tier(&entry.record.status) == Tier::Pinned
}

/// Pinned tier first in its existing relative order, then the remainder by
/// due date ascending. The sort is stable, so equal dates keep their order.
pub fn order_active(entries: Vec<Entry>) -> Vec<Entry> {
    let (mut pinned, mut remainder): (Vec<Entry>, Vec<Entry>) = entries.into_iter().partition(is_pinned);
    remainder.sort_by_key(|entry| DateKey::of(&entry.record));
    pinned.extend(remainder);
    pinned
}

/// Most recently due first; unknown dates last.
pub fn order_finished(mut entries: Vec<Entry>) -> Vec<Entry> {
    entries.sort_by(|a, b| compare_descending(DateKey::of(&a.record), DateKey::of(&b.record)));
    entries
}

fn compare_descending(a: DateKey, b: DateKey) -> Ordering {
    match (a, b) {
        (DateKey::Known(left), DateKey::Known(right)) => right.cmp(&left),
        (DateKey::Known(_), DateKey::Unknown) => Ordering::Less,
        (DateKey::Unknown, DateKey::Known(_)) => Ordering::Greater,
        (DateKey::Unknown, DateKey::Unknown) => Ordering::Equal,
    }
}

/// Display sequence for the active partition: the pinned tier, then each date
/// group followed by a separator carrying the group's label.
pub fn active_rows(entries: &[Entry]) -> Vec<DisplayRow> {
    let ordered = order_active(entries.to_vec());
    let mut rows = Vec::with_capacity(ordered.len() * 2);
    let mut open_group: Option<DateKey> = None;

    for entry in ordered {
        if is_pinned(&entry) {
            rows.push(DisplayRow::Item(entry));
            continue;
        }
        let key = DateKey::of(&entry.record);
        if let Some(previous) = open_group {
            if previous != key {
                rows.push(separator(previous));
            }
        }
        open_group = Some(key);
        rows.push(DisplayRow::Item(entry));
    }
    if let Some(last) = open_group {
        rows.push(separator(last));
    }
    rows
}

pub fn finished_rows(entries: &[Entry]) -> Vec<DisplayRow> {
    order_finished(entries.to_vec())
        .into_iter()
        .map(DisplayRow::Item)
        .collect()
}

fn separator(key: DateKey) -> DisplayRow {
    DisplayRow::Separator(Separator { label: key.label() })
}

pub fn strip_separators(rows: Vec<DisplayRow>) -> Vec<Entry> {
    rows.into_iter()
        .filter_map(|row| match row {
            DisplayRow::Item(entry) => Some(entry),
            DisplayRow::Separator(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DueDate, Entry, Record};

    fn dated(customer: &str, due: &str, status: &str) -> Entry {
        Entry::new(Record {
            customer: customer.to_string(),
            due_date: DueDate::parse(due),
            status: status.to_string(),
            ..Record::default()
        })
    }

    fn shape(rows: &[DisplayRow]) -> Vec<String> {
        rows.iter()
            .map(|row| match row {
                DisplayRow::Item(entry) => entry.record.customer.clone(),
                DisplayRow::Separator(separator) => format!("--{}", separator.label),
            })
            .collect()
    }

    #[test]
    fn groups_are_followed_by_their_separator() {
        let rows = active_rows(&[dated("b", "06/01/2025", "Quote"), dated("a", "05/01/2025", "Quote")]);
        assert_eq!(shape(&rows), vec!["a", "--05/01/2025", "b", "--06/01/2025"]);
    }

    #[test]
    fn unknown_dates_trail_every_known_group() {
        let rows = active_rows(&[
            dated("later", "07/01/2025", "Quote"),
            dated("mystery", "tbc", "Quote"),
            dated("early", "05/01/2025", "Quote"),
            dated("middle", "06/01/2025", "Assembly"),
        ]);
        assert_eq!(
            shape(&rows),
            vec![
                "early",
                "--05/01/2025",
                "middle",
                "--06/01/2025",
                "later",
                "--07/01/2025",
                "mystery",
                "--No Date",
            ]
        );
    }

    #[test]
    fn pinned_records_lead_regardless_of_date() {
        let rows = active_rows(&[
            dated("soon", "01/01/2025", "Quote"),
            dated("pinned-late", "31/12/2025", "Completed"),
            dated("pinned-undated", "", "completed"),
        ]);
        assert_eq!(
            shape(&rows),
            vec!["pinned-late", "pinned-undated", "soon", "--01/01/2025"]
        );
    }

    #[test]
    fn same_day_records_keep_relative_order() {
        let first = dated("first", "05/01/2025", "Quote");
        let second = dated("second", "05/01/2025", "Quote");
        let ordered = order_active(vec![first.clone(), second.clone()]);
        assert_eq!(ordered, vec![first, second]);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let entries = vec![
            dated("c", "bad date", "Quote"),
            dated("b", "06/01/2025", "Quote"),
            dated("p", "06/01/2025", "Completed"),
            dated("a", "05/01/2025", "Picking"),
            dated("a2", "05/01/2025", "Quote"),
        ];
        let once = active_rows(&entries);
        let twice = active_rows(&strip_separators(once.clone()));
        assert_eq!(once, twice);
    }

    #[test]
    fn finished_sorts_newest_first_without_separators() {
        let rows = finished_rows(&[
            dated("old", "01/01/2025", "Picked Up"),
            dated("none", "", "Cancelled"),
            dated("new", "03/01/2025", "Picked Up"),
        ]);
        assert_eq!(shape(&rows), vec!["new", "old", "none"]);
        assert!(rows.iter().all(|row| !row.is_separator()));
    }
}
