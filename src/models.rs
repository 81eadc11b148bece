use crate::errors::{AppError, AppResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%d/%m/%Y";

/// Due date as stored in the shared file. Text that does not parse as
/// `dd/mm/yyyy` is kept verbatim and sorts after every known date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DueDate {
    Known(NaiveDate),
    Unknown(String),
}

impl Default for DueDate {
    fn default() -> Self {
        Self::Unknown(String::new())
    }
}

impl DueDate {
    pub fn parse(raw: &str) -> Self {
        match NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT) {
            Ok(date) => Self::Known(date),
            Err(_) => Self::Unknown(raw.to_string()),
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Self::Known(date) => Some(*date),
            Self::Unknown(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Known(date) => date.format(DATE_FORMAT).to_string(),
            Self::Unknown(raw) => raw.clone(),
        }
    }
}

/// One worklist line item, exactly the columns persisted in the branch files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub retail: String,
    pub oe: String,
    pub customer: String,
    pub serial_number: String,
    pub day_due: String,
    pub due_date: DueDate,
    pub status: String,
    pub quantity: i64,
    pub what_is_it: String,
    pub purchase_order: String,
    pub work_description: String,
    pub parts: String,
    pub shaft_type: String,
    pub priority: String,
    pub last_user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordField {
    Retail,
    Oe,
    Customer,
    SerialNumber,
    DayDue,
    DueDate,
    Status,
    Quantity,
    WhatIsIt,
    PurchaseOrder,
    WorkDescription,
    Parts,
    ShaftType,
    Priority,
    LastUser,
}

impl RecordField {
    /// Canonical column order of the branch files.
    pub const ALL: [RecordField; 15] = [
        Self::Retail,
        Self::Oe,
        Self::Customer,
        Self::SerialNumber,
        Self::DayDue,
        Self::DueDate,
        Self::Status,
        Self::Quantity,
        Self::WhatIsIt,
        Self::PurchaseOrder,
        Self::WorkDescription,
        Self::Parts,
        Self::ShaftType,
        Self::Priority,
        Self::LastUser,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Self::Retail => "RETAIL",
            Self::Oe => "OE",
            Self::Customer => "CUSTOMER",
            Self::SerialNumber => "SERIAL",
            Self::DayDue => "DAY DUE",
            Self::DueDate => "DATE DUE",
            Self::Status => "STATUS",
            Self::Quantity => "QTY",
            Self::WhatIsIt => "WHAT IS IT",
            Self::PurchaseOrder => "PO",
            Self::WorkDescription => "WHAT ARE WE DOING",
            Self::Parts => "PARTS",
            Self::ShaftType => "SHAFT",
            Self::Priority => "PRIORITY",
            Self::LastUser => "LAST USER",
        }
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::SerialNumber => &["SERIAL NUMBER"],
            Self::DueDate => &["DUE DATE"],
            Self::Quantity => &["QUANTITY"],
            Self::PurchaseOrder => &["PURCHASE ORDER"],
            Self::WorkDescription => &["WORK DESCRIPTION", "DESCRIPTION OF WORK"],
            Self::ShaftType => &["SHAFT TYPE"],
            _ => &[],
        }
    }
}

impl FromStr for RecordField {
    type Err = AppError;

    /// Accepts column headers (`DAY DUE`), snake case (`day_due`) and camel case (`dayDue`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let squash = |input: &str| {
            input
                .chars()
                .filter(|ch| ch.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_uppercase()
        };
        let wanted = squash(value);
        Self::ALL
            .into_iter()
            .find(|field| {
                squash(field.header()) == wanted || field.aliases().iter().any(|alias| squash(alias) == wanted)
            })
            .ok_or_else(|| AppError::Invalid(format!("Unknown record field '{}'", value)))
    }
}

impl Record {
    pub fn field_text(&self, field: RecordField) -> String {
        match field {
            RecordField::Retail => self.retail.clone(),
            RecordField::Oe => self.oe.clone(),
            RecordField::Customer => self.customer.clone(),
            RecordField::SerialNumber => self.serial_number.clone(),
            RecordField::DayDue => self.day_due.clone(),
            RecordField::DueDate => self.due_date.label(),
            RecordField::Status => self.status.clone(),
            RecordField::Quantity => self.quantity.to_string(),
            RecordField::WhatIsIt => self.what_is_it.clone(),
            RecordField::PurchaseOrder => self.purchase_order.clone(),
            RecordField::WorkDescription => self.work_description.clone(),
            RecordField::Parts => self.parts.clone(),
            RecordField::ShaftType => self.shaft_type.clone(),
            RecordField::Priority => self.priority.clone(),
            RecordField::LastUser => self.last_user.clone(),
        }
    }

    /// Tolerant assignment used when reading files: a bad quantity becomes 0.
    pub fn assign_column(&mut self, field: RecordField, raw: &str) {
        if field == RecordField::Quantity {
            self.quantity = raw.trim().parse().unwrap_or(0);
            return;
        }
        self.assign_text(field, raw);
    }

    /// Strict assignment used for interactive edits.
    pub fn set_field(&mut self, field: RecordField, value: &str) -> AppResult<()> {
        if field == RecordField::Quantity {
            let trimmed = value.trim();
            self.quantity = if trimmed.is_empty() {
                0
            } else {
                trimmed
                    .parse()
                    .map_err(|_| AppError::Invalid(format!("Quantity '{}' is not a whole number", value)))?
            };
            return Ok(());
        }
        self.assign_text(field, value);
        Ok(())
    }

    fn assign_text(&mut self, field: RecordField, raw: &str) {
        let value = raw.to_string();
        match field {
            RecordField::Retail => self.retail = value,
            RecordField::Oe => self.oe = value,
            RecordField::Customer => self.customer = value,
            RecordField::SerialNumber => self.serial_number = value,
            RecordField::DayDue => self.day_due = value,
            RecordField::DueDate => self.due_date = DueDate::parse(raw),
            RecordField::Status => self.status = value,
            RecordField::Quantity => self.quantity = raw.trim().parse().unwrap_or(0),
            RecordField::WhatIsIt => self.what_is_it = value,
            RecordField::PurchaseOrder => self.purchase_order = value,
            RecordField::WorkDescription => self.work_description = value,
            RecordField::Parts => self.parts = value,
            RecordField::ShaftType => self.shaft_type = value,
            RecordField::Priority => self.priority = value,
            RecordField::LastUser => self.last_user = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec_{}", self.0.simple())
    }
}

/// A record plus the in-memory identity the UI uses to address it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: RecordId,
    pub record: Record,
}

impl Entry {
    pub fn new(record: Record) -> Self {
        Self {
            id: RecordId::new(),
            record,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    Active,
    Finished,
}

impl Partition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    Pinned,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Separator {
    pub label: String,
}

/// One line of a derived display sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DisplayRow {
    Item(Entry),
    Separator(Separator),
}

impl DisplayRow {
    pub fn is_separator(&self) -> bool {
        matches!(self, Self::Separator(_))
    }

    pub fn entry(&self) -> Option<&Entry> {
        match self {
            Self::Item(entry) => Some(entry),
            Self::Separator(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchView {
    pub active: Vec<DisplayRow>,
    pub finished: Vec<DisplayRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_date_keeps_unparseable_text() {
        assert_eq!(
            DueDate::parse(" 05/01/2025 "),
            DueDate::Known(NaiveDate::from_ymd_opt(2025, 1, 5).expect("date"))
        );
        let unknown = DueDate::parse("next week");
        assert_eq!(unknown.date(), None);
        assert_eq!(unknown.label(), "next week");
        assert_eq!(DueDate::parse(""), DueDate::default());
    }

    #[test]
    fn field_names_resolve_from_headers_and_code_names() {
        assert_eq!("DAY DUE".parse::<RecordField>().expect("header"), RecordField::DayDue);
        assert_eq!("serial_number".parse::<RecordField>().expect("snake"), RecordField::SerialNumber);
        assert_eq!("workDescription".parse::<RecordField>().expect("camel"), RecordField::WorkDescription);
        assert_eq!("qty".parse::<RecordField>().expect("short"), RecordField::Quantity);
        assert!("colour".parse::<RecordField>().is_err());
    }

    #[test]
    fn quantity_edits_are_strict_but_column_reads_are_tolerant() {
        let mut record = Record::default();
        assert!(record.set_field(RecordField::Quantity, "two").is_err());
        record.set_field(RecordField::Quantity, " 3 ").expect("valid quantity");
        assert_eq!(record.quantity, 3);

        record.assign_column(RecordField::Quantity, "two");
        assert_eq!(record.quantity, 0);
    }
}
