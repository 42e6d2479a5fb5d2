use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Concept identifiers are numeric (SCTID-style).
pub type ConceptId = u64;

/// Epoch milliseconds. Timeslice intervals `[start, end)` are half-open.
pub type Timepoint = i64;

/// The is-a hierarchy attribute type.
pub const IS_A: ConceptId = 116_680_003;

/// Internal document version key, distinct from any logical component id.
pub fn generate_internal_id() -> String {
    Uuid::new_v4().to_string()
}

static LAST_TIMEPOINT: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing process-wide timepoint. Commits issued within the same
/// wall-clock millisecond still receive distinct timepoints, so timeslice
/// intervals partition without overlaps.
pub fn next_timepoint() -> Timepoint {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_TIMEPOINT.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_TIMEPOINT.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Which logic form of the semantic index a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Form {
    Stated,
    Inferred,
}

impl Form {
    pub fn is_stated(self) -> bool {
        self == Form::Stated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timepoints_strictly_increase() {
        let mut previous = next_timepoint();
        for _ in 0..1000 {
            let t = next_timepoint();
            assert!(t > previous);
            previous = t;
        }
    }
}
