use std::collections::HashSet;

use chrono::NaiveDate;

use crate::bell::model::BellSlot;

/// A bell that may fire today: the scheduled `HH:MM` text plus where it lives in the timetable.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RungIdentifier {
    pub time: String,
    pub slot: BellSlot,
}

impl RungIdentifier {
    pub fn new(time: &str, slot: BellSlot) -> Self {
        Self {
            time: time.to_string(),
            slot,
        }
    }
}

/// Bells already fired on the current calendar date.
#[derive(Debug, Clone)]
pub struct RungSet {
    rung: HashSet<RungIdentifier>,
    last_checked: NaiveDate,
}

impl RungSet {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            rung: HashSet::new(),
            last_checked: today,
        }
    }

    pub fn has_rung(&self, identifier: &RungIdentifier) -> bool {
        self.rung.contains(identifier)
    }

    /// Returns false when the identifier was already present.
    pub fn mark_rung(&mut self, identifier: RungIdentifier) -> bool {
        self.rung.insert(identifier)
    }

    /// Clears everything when `today` differs from the last observed date. Returns true on reset.
    pub fn reset_for_new_day(&mut self, today: NaiveDate) -> bool {
        if today == self.last_checked {
            return false;
        }
        self.rung.clear();
        self.last_checked = today;
        true
    }

    pub fn last_checked(&self) -> NaiveDate {
        self.last_checked
    }

    pub fn len(&self) -> usize {
        self.rung.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rung.is_empty()
    }
}
