//! Idempotency-key dedup registry (§3, §4.9): at most one live job per `key`.

use std::collections::HashMap;

use agent_common::{DedupPolicy, Id};

/// Outcome of checking a submission against the dedup registry.
pub enum DedupOutcome {
    /// No collision (or no key): proceed with enqueue and register `key`.
    Proceed,
    /// `REJECT`/`COALESCE`: submission is refused, nothing changes.
    Refused { reason: String },
    /// `LATEST_WINS`: the old entry is displaced; caller should cancel it.
    Displaced { cancel_job_id: Id },
}

#[derive(Default)]
pub struct DedupRegistry {
    by_key: HashMap<String, Id>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, key: Option<&str>, new_job_id: &Id, policy: DedupPolicy) -> DedupOutcome {
        let Some(key) = key else {
            return DedupOutcome::Proceed;
        };
        let Some(existing) = self.by_key.get(key).cloned() else {
            self.by_key.insert(key.to_string(), new_job_id.clone());
            return DedupOutcome::Proceed;
        };

        match policy {
            DedupPolicy::Reject => DedupOutcome::Refused {
                reason: format!("Duplicate key: {key}"),
            },
            DedupPolicy::Coalesce => DedupOutcome::Refused {
                reason: format!("Coalesced with {existing}"),
            },
            DedupPolicy::LatestWins => {
                self.by_key.insert(key.to_string(), new_job_id.clone());
                DedupOutcome::Displaced {
                    cancel_job_id: existing,
                }
            }
        }
    }

    /// Removes `key`'s entry once its job reaches a terminal state.
    pub fn deregister(&mut self, key: Option<&str>) {
        if let Some(key) = key {
            self.by_key.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_key_always_proceeds() {
        let mut reg = DedupRegistry::new();
        assert!(matches!(
            reg.check(None, &Id::from_string("a"), DedupPolicy::Reject),
            DedupOutcome::Proceed
        ));
    }

    #[test]
    fn reject_refuses_duplicate() {
        let mut reg = DedupRegistry::new();
        reg.check(Some("k"), &Id::from_string("a"), DedupPolicy::Reject);
        assert!(matches!(
            reg.check(Some("k"), &Id::from_string("b"), DedupPolicy::Reject),
            DedupOutcome::Refused { .. }
        ));
    }

    #[test]
    fn coalesce_refuses_duplicate() {
        let mut reg = DedupRegistry::new();
        reg.check(Some("k"), &Id::from_string("a"), DedupPolicy::Coalesce);
        assert!(matches!(
            reg.check(Some("k"), &Id::from_string("b"), DedupPolicy::Coalesce),
            DedupOutcome::Refused { .. }
        ));
    }

    #[test]
    fn latest_wins_displaces_old_entry() {
        let mut reg = DedupRegistry::new();
        reg.check(Some("k"), &Id::from_string("a"), DedupPolicy::LatestWins);
        let outcome = reg.check(Some("k"), &Id::from_string("b"), DedupPolicy::LatestWins);
        match outcome {
            DedupOutcome::Displaced { cancel_job_id } => assert_eq!(cancel_job_id.as_str(), "a"),
            _ => panic!("expected displacement"),
        }
        // b is now the registered entry.
        let outcome = reg.check(Some("k"), &Id::from_string("c"), DedupPolicy::Coalesce);
        match outcome {
            DedupOutcome::Refused { reason } => assert!(reason.contains('b')),
            _ => panic!("expected refusal"),
        }
    }

    #[test]
    fn deregister_clears_key() {
        let mut reg = DedupRegistry::new();
        reg.check(Some("k"), &Id::from_string("a"), DedupPolicy::Reject);
        reg.deregister(Some("k"));
        assert!(matches!(
            reg.check(Some("k"), &Id::from_string("b"), DedupPolicy::Reject),
            DedupOutcome::Proceed
        ));
    }
}
