//! C9: two-phase-commit bookkeeping and loose-end transactions (spec.md
//! §4.9).
//!
//! A coordinator transaction that has sent "prepare" to its participants but
//! not yet heard back from all of them is a *loose end*: its TDES cannot be
//! freed on the originating client's disconnect because the second phase
//! (global commit or global abort) still has to run against it. The
//! transaction table keeps a loose-end TDES's slot alive (see
//! [`crate::txn::tdes::Tdes::is_loose_end`]) instead of recycling it.

use crate::txn::types::TransactionState;

/// Global transaction identifier assigned by the 2PC coordinator, distinct
/// from the local [`crate::txn::types::Trid`].
pub type Gtrid = i64;

#[derive(Debug, Clone)]
pub struct Participant {
    pub name: String,
    pub voted_commit: Option<bool>,
}

/// Two-phase-commit state attached to a TDES once it becomes a coordinator
/// (`start`) or an agent (`register` on the remote side).
#[derive(Debug, Clone)]
pub struct TwoPcState {
    pub gtrid: Gtrid,
    pub participants: Vec<Participant>,
}

impl TwoPcState {
    pub fn new(gtrid: Gtrid, participant_names: Vec<String>) -> Self {
        Self {
            gtrid,
            participants: participant_names
                .into_iter()
                .map(|name| Participant { name, voted_commit: None })
                .collect(),
        }
    }

    /// Records one participant's vote. Returns `true` once every participant
    /// has voted, at which point the coordinator can move to the second
    /// phase.
    pub fn record_vote(&mut self, participant: &str, commit: bool) -> bool {
        if let Some(p) = self.participants.iter_mut().find(|p| p.name == participant) {
            p.voted_commit = Some(commit);
        }
        self.all_voted()
    }

    pub fn all_voted(&self) -> bool {
        self.participants.iter().all(|p| p.voted_commit.is_some())
    }

    /// The global outcome once every vote is in: commit only if every
    /// participant voted to commit, matching 2PC's unanimity rule.
    pub fn global_outcome(&self) -> Option<bool> {
        if !self.all_voted() {
            return None;
        }
        Some(self.participants.iter().all(|p| p.voted_commit == Some(true)))
    }

    /// The [`TransactionState`] this coordinator should be in before every
    /// vote is collected.
    pub fn in_progress_state(&self) -> TransactionState {
        if self.all_voted() {
            TransactionState::TwoPcSecondPhase
        } else {
            TransactionState::TwoPcCollectingVotes
        }
    }
}
