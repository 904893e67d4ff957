use std::collections::HashMap;

use crate::backend::reservation_station::RSTag;

/// Outcome of a register status lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    // the value will be produced by the reservation station with this tag
    Pending(RSTag),
    // the value in the register file is authoritative
    Committed,
}

/// The register status table. This structure is used for the register
/// renaming process: the entry for a register names the reservation station
/// that will produce its next value. As long as such an entry exists, readers
/// must wait for the broadcast of that station instead of reading the
/// register file.
pub(crate) struct RegisterStatusTable {
    table: HashMap<String, RSTag>,
}

impl RegisterStatusTable {
    pub(crate) fn new() -> Self {
        Self { table: HashMap::new() }
    }

    pub(crate) fn lookup(&self, reg: &str) -> RegisterStatus {
        match self.table.get(reg) {
            Some(tag) => RegisterStatus::Pending(*tag),
            None => RegisterStatus::Committed,
        }
    }

    // The newest issue always wins (WAW).
    pub(crate) fn mark_pending(&mut self, reg: &str, tag: RSTag) {
        self.table.insert(reg.to_string(), tag);
    }

    /// Clears the pending marker of `reg`, but only when it still points to `tag`.
    /// Returns true if the marker was cleared.
    pub(crate) fn clear_if_matches(&mut self, reg: &str, tag: RSTag) -> bool {
        if self.table.get(reg) == Some(&tag) {
            self.table.remove(reg);
            true
        } else {
            false
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
