//! Request id allocation and response correlation
//!
//! [`Correlator`] owns the monotonic id counter and the pending table for one
//! client session. Each outstanding request moves through a small state
//! machine:
//!
//! ```text
//! Sent --(matching response)--> Resolved   (entry removed)
//! Sent --(timeout)------------> Abandoned  (entry kept, late reply discarded)
//! Sent/Abandoned --(shutdown or end of stream)--> removed
//! ```
//!
//! A timed-out entry stays in the table as `Abandoned` so that its late
//! response is recognised as stale, removed, and discarded without touching
//! any other entry.

use std::collections::HashMap;
use std::time::Instant;

/// State of an entry in the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Request written; awaiting its response.
    Sent,
    /// The caller stopped waiting (timeout); a late response will be dropped.
    Abandoned,
}

/// One outstanding request.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Method of the request, for diagnostics.
    pub method: String,
    /// Current state.
    pub state: PendingState,
    /// When the request was registered.
    pub sent_at: Instant,
}

/// Outcome of matching an inbound response id.
#[derive(Debug)]
pub enum Correlation {
    /// The response answers the request the caller is waiting on.
    Matched(PendingEntry),
    /// A late response to an abandoned request; the entry has been removed.
    Stale(PendingEntry),
    /// The id belongs to another request that is still `Sent`; left untouched.
    OtherPending,
    /// The id was never issued or was already resolved (duplicate).
    Unknown,
}

/// Id allocator plus pending table for a single session.
///
/// # Examples
///
/// ```
/// use pgmcp_harness::mcp::correlation::{Correlation, Correlator};
///
/// let mut correlator = Correlator::new();
/// let id = correlator.begin("ping");
/// assert_eq!(id, 1);
/// assert!(matches!(correlator.correlate(id, id), Correlation::Matched(_)));
/// assert!(correlator.is_empty());
/// ```
#[derive(Debug)]
pub struct Correlator {
    next_id: u64,
    pending: HashMap<u64, PendingEntry>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Create a correlator whose first id is `1`.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next id and register it as `Sent`.
    ///
    /// Ids are strictly increasing and never reused within a session.
    pub fn begin(&mut self, method: &str) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.pending.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                state: PendingState::Sent,
                sent_at: Instant::now(),
            },
        );
        id
    }

    /// The id the next call to [`Correlator::begin`] will return.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id
    }

    /// Match an inbound response id against the pending table.
    ///
    /// `awaited` is the id the caller is currently blocked on.
    pub fn correlate(&mut self, id: u64, awaited: u64) -> Correlation {
        if id == awaited {
            return match self.pending.remove(&id) {
                Some(entry) => Correlation::Matched(entry),
                None => Correlation::Unknown,
            };
        }
        match self.pending.get(&id).map(|e| e.state) {
            Some(PendingState::Abandoned) => match self.pending.remove(&id) {
                Some(entry) => Correlation::Stale(entry),
                None => Correlation::Unknown,
            },
            Some(PendingState::Sent) => Correlation::OtherPending,
            None => Correlation::Unknown,
        }
    }

    /// Mark an entry abandoned without removing it.
    ///
    /// Returns `false` if the id is not pending.
    pub fn abandon(&mut self, id: u64) -> bool {
        match self.pending.get_mut(&id) {
            Some(entry) => {
                entry.state = PendingState::Abandoned;
                true
            }
            None => false,
        }
    }

    /// Remove every entry; used at shutdown and end of stream.
    ///
    /// Returns the removed entries ordered by id.
    pub fn abandon_all(&mut self) -> Vec<(u64, PendingEntry)> {
        let mut drained: Vec<(u64, PendingEntry)> = self.pending.drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }

    /// State of a pending id, if present.
    pub fn state(&self, id: u64) -> Option<PendingState> {
        self.pending.get(&id).map(|e| e.state)
    }

    /// Number of entries in the pending table.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the pending table is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
