use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CrawlError, CrawlResult};

/// Scheduler lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unprepared,
    Preparing,
    Prepared,
    Starting,
    Started,
    Pausing,
    Paused,
    Stopping,
    Stopped,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::Unprepared,
        Status::Preparing,
        Status::Prepared,
        Status::Starting,
        Status::Started,
        Status::Pausing,
        Status::Paused,
        Status::Stopping,
        Status::Stopped,
    ];

    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            Status::Preparing | Status::Starting | Status::Pausing | Status::Stopping
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Unprepared => "unprepared",
            Status::Preparing => "preparing",
            Status::Prepared => "prepared",
            Status::Starting => "starting",
            Status::Started => "started",
            Status::Pausing => "pausing",
            Status::Paused => "paused",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Checks whether `current` may move to the transitional status `wanted`.
pub fn check_status(current: Status, wanted: Status) -> CrawlResult<()> {
    let conflict = |reason: &str| {
        Err(CrawlError::StatusConflict(format!(
            "{} -> {}: {}",
            current, wanted, reason
        )))
    };

    if current.is_transitional() {
        return conflict("scheduler is busy");
    }
    let allowed = match wanted {
        Status::Preparing => current == Status::Unprepared,
        Status::Starting => matches!(current, Status::Prepared | Status::Paused),
        Status::Pausing => current == Status::Started,
        Status::Stopping => matches!(current, Status::Started | Status::Paused),
        _ => return conflict("not a transitional status"),
    };
    if allowed {
        Ok(())
    } else {
        conflict("transition not allowed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: [(Status, Status); 6] = [
        (Status::Unprepared, Status::Preparing),
        (Status::Prepared, Status::Starting),
        (Status::Paused, Status::Starting),
        (Status::Started, Status::Pausing),
        (Status::Started, Status::Stopping),
        (Status::Paused, Status::Stopping),
    ];

    #[test]
    fn test_transition_table() {
        for current in Status::ALL {
            for wanted in Status::ALL {
                let result = check_status(current, wanted);
                if ALLOWED.contains(&(current, wanted)) {
                    assert!(result.is_ok(), "{} -> {} should be allowed", current, wanted);
                } else {
                    assert!(
                        matches!(result, Err(CrawlError::StatusConflict(_))),
                        "{} -> {} should be rejected",
                        current,
                        wanted
                    );
                }
            }
        }
    }
}
