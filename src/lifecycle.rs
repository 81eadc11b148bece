use crate::models::{Entry, Partition, Tier};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    Quote,
    Quoting,
    BookedIn,
    Assembly,
    Balancing,
    DriveShop,
    PaintShop,
    Picking,
    OnHold,
    Completed,
    PickedUp,
    Cancelled,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusProfile {
    pub kind: StatusKind,
    pub label: &'static str,
    pub tier: Tier,
    pub partition: Partition,
}

const fn profile(kind: StatusKind, label: &'static str, tier: Tier, partition: Partition) -> StatusProfile {
    StatusProfile {
        kind,
        label,
        tier,
        partition,
    }
}

/// Every known status and where it places a record. Adding a status means adding one row.
pub const STATUS_TABLE: &[StatusProfile] = &[
    profile(StatusKind::Quote, "Quote", Tier::Normal, Partition::Active),
    profile(StatusKind::Quoting, "Quoting", Tier::Normal, Partition::Active),
    profile(StatusKind::BookedIn, "Booked In", Tier::Normal, Partition::Active),
    profile(StatusKind::Assembly, "Assembly", Tier::Normal, Partition::Active),
    profile(StatusKind::Balancing, "Balancing", Tier::Normal, Partition::Active),
    profile(StatusKind::DriveShop, "Drive Shop", Tier::Normal, Partition::Active),
    profile(StatusKind::PaintShop, "Paint Shop", Tier::Normal, Partition::Active),
    profile(StatusKind::Picking, "Picking", Tier::Normal, Partition::Active),
    profile(StatusKind::OnHold, "On Hold", Tier::Normal, Partition::Active),
    profile(StatusKind::Completed, "Completed", Tier::Pinned, Partition::Active),
    profile(StatusKind::PickedUp, "Picked Up", Tier::Normal, Partition::Finished),
    profile(StatusKind::Cancelled, "Cancelled", Tier::Normal, Partition::Finished),
];

const OTHER: StatusProfile = profile(StatusKind::Other, "", Tier::Normal, Partition::Active);

pub fn status_profile(status: &str) -> StatusProfile {
    let status = status.trim();
    STATUS_TABLE
        .iter()
        .copied()
        .find(|entry| entry.label.eq_ignore_ascii_case(status))
        .unwrap_or(OTHER)
}

pub fn classify(status: &str) -> Partition {
    status_profile(status).partition
}

pub fn tier(status: &str) -> Tier {
    status_profile(status).tier
}

pub fn is_terminal(status: &str) -> bool {
    classify(status) == Partition::Finished
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Migration {
    pub to_finished: usize,
    pub to_active: usize,
}

impl Migration {
    pub fn is_empty(&self) -> bool {
        self.to_finished == 0 && self.to_active == 0
    }
}

/// Splits entries by what their status implies, ignoring where they came from.
pub fn partition_entries(entries: Vec<Entry>) -> (Vec<Entry>, Vec<Entry>) {
    entries
        .into_iter()
        .partition(|entry| classify(&entry.record.status) == Partition::Active)
}

/// Moves every entry whose status disagrees with its partition. Entries that
/// move are appended to the end of their new partition.
pub fn reclassify(active: &mut Vec<Entry>, finished: &mut Vec<Entry>) -> Migration {
    let mut migration = Migration::default();

    let (stay_active, leaving_active): (Vec<Entry>, Vec<Entry>) = std::mem::take(active)
        .into_iter()
        .partition(|entry| classify(&entry.record.status) == Partition::Active);
    let (stay_finished, leaving_finished): (Vec<Entry>, Vec<Entry>) = std::mem::take(finished)
        .into_iter()
        .partition(|entry| classify(&entry.record.status) == Partition::Finished);

    migration.to_finished = leaving_active.len();
    migration.to_active = leaving_finished.len();

    *active = stay_active;
    active.extend(leaving_finished);
    *finished = stay_finished;
    finished.extend(leaving_active);

    if !migration.is_empty() {
        tracing::debug!(
            to_finished = migration.to_finished,
            to_active = migration.to_active,
            "reclassified records"
        );
    }
    migration
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    fn entry(status: &str) -> Entry {
        Entry::new(Record {
            status: status.to_string(),
            customer: format!("cust-{}", status),
            ..Record::default()
        })
    }

    #[test]
    fn terminal_statuses_match_case_insensitively() {
        assert_eq!(classify("Picked Up"), Partition::Finished);
        assert_eq!(classify("  cancelled "), Partition::Finished);
        assert_eq!(classify("PICKED UP"), Partition::Finished);
        assert_eq!(classify("Quote"), Partition::Active);
        assert_eq!(classify(""), Partition::Active);
        assert_eq!(classify("waiting on courier"), Partition::Active);
    }

    #[test]
    fn completed_is_the_pinned_tier() {
        assert_eq!(tier("completed"), Tier::Pinned);
        assert_eq!(tier("On Hold"), Tier::Normal);
        assert_eq!(status_profile("unknown").kind, StatusKind::Other);
        assert_eq!(STATUS_TABLE.iter().filter(|row| row.tier == Tier::Pinned).count(), 1);
    }

    #[test]
    fn reclassify_moves_both_ways_and_keeps_fields() {
        let mut leaving = entry("Assembly");
        let leaving_id = leaving.id;
        leaving.record.status = "Picked Up".to_string();
        let expected = leaving.record.clone();

        let mut returning = entry("Cancelled");
        let returning_id = returning.id;
        returning.record.status = "On Hold".to_string();

        let mut active = vec![entry("Quote"), leaving];
        let mut finished = vec![returning, entry("Picked Up")];

        let migration = reclassify(&mut active, &mut finished);
        assert_eq!(migration, Migration { to_finished: 1, to_active: 1 });
        assert!(active.iter().any(|entry| entry.id == returning_id));
        let moved = finished.iter().find(|entry| entry.id == leaving_id).expect("moved");
        assert_eq!(moved.record, expected);

        assert!(reclassify(&mut active, &mut finished).is_empty());
    }
}
