use serde::Serialize;
use strum::{Display, EnumString};

/// Result of processing one queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Fresh data stored (or the product was already fresh).
    Success,
    /// The fetch failed recoverably; retry later.
    TransientFailure,
    /// The source asked us to stop processing for now.
    FatalSuspend,
}

/// Why a drain loop stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DrainStop {
    #[default]
    Exhausted,
    Suspended,
}

/// Per-drain tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: u64,
    pub released: u64,
    pub abandoned: u64,
    /// Left claimed after an unexpected error; the lease hands them back later.
    pub deferred: u64,
    pub stopped: DrainStop,
}

impl DrainReport {
    pub fn processed(&self) -> u64 {
        self.succeeded + self.released + self.abandoned + self.deferred
    }

    pub fn suspended(&self) -> bool {
        self.stopped == DrainStop::Suspended
    }
}

/// Result of a full "sweep then drain" renewal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenewalRun {
    /// Nothing was stale; no work was queued.
    NothingToUpdate,
    Completed {
        queued: u64,
        drain: DrainReport,
        remaining_stale: u64,
    },
}
