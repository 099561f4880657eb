//! # Status Lattice
//! Three-valued completion model shared by gatherer responses and results,
//! plus the rule that folds several per-gatherer statuses into one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Completion state of a gatherer response or of a whole result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Work accepted, not complete yet (poll later).
    Submitted,
    /// Complete, data available.
    Retrieved,
    /// Failed.
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Submitted => "SUBMITTED",
            Status::Retrieved => "RETRIEVED",
            Status::Error => "ERROR",
        }
    }

    /// `true` once nothing more can happen to this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Submitted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduce per-gatherer statuses into the overall status.
///
/// - every element `Retrieved` → `Retrieved`
/// - otherwise any `Error` → `Error` (errors dominate incompleteness)
/// - otherwise → `Submitted`
///
/// Returns `None` for an empty sequence; callers must reject sources with no
/// gatherers before reducing.
pub fn reduce<'a, I>(statuses: I) -> Option<Status>
where
    I: IntoIterator<Item = &'a Status>,
{
    let mut seen = false;
    let mut all_retrieved = true;
    let mut any_error = false;

    for s in statuses {
        seen = true;
        match s {
            Status::Retrieved => {}
            Status::Error => {
                all_retrieved = false;
                any_error = true;
            }
            Status::Submitted => all_retrieved = false,
        }
    }

    if !seen {
        return None;
    }
    Some(if all_retrieved {
        Status::Retrieved
    } else if any_error {
        Status::Error
    } else {
        Status::Submitted
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use Status::*;

    #[test]
    fn all_retrieved_is_retrieved() {
        assert_eq!(reduce(&[Retrieved, Retrieved]), Some(Retrieved));
        assert_eq!(reduce(&[Retrieved]), Some(Retrieved));
    }

    #[test]
    fn error_dominates_submitted() {
        assert_eq!(reduce(&[Submitted, Error, Retrieved]), Some(Error));
        assert_eq!(reduce(&[Error]), Some(Error));
    }

    #[test]
    fn pending_without_errors_is_submitted() {
        assert_eq!(reduce(&[Retrieved, Submitted]), Some(Submitted));
    }

    #[test]
    fn empty_has_no_status() {
        assert_eq!(reduce(&[] as &[Status]), None);
    }

    #[test]
    fn exhaustive_pairs_follow_the_rule() {
        let all = [Submitted, Retrieved, Error];
        for a in all {
            for b in all {
                let got = reduce(&[a, b]).unwrap();
                let want = if a == Retrieved && b == Retrieved {
                    Retrieved
                } else if a == Error || b == Error {
                    Error
                } else {
                    Submitted
                };
                assert_eq!(got, want, "reduce([{a}, {b}])");
            }
        }
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let s = serde_json::to_string(&Submitted).unwrap();
        assert_eq!(s, "\"SUBMITTED\"");
        let back: Status = serde_json::from_str("\"RETRIEVED\"").unwrap();
        assert_eq!(back, Retrieved);
    }
}
