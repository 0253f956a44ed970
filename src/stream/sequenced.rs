//! Nonce-gated state: snapshot + ordered deltas, with gap detection.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

/// State that can be advanced by nonce-tagged deltas.
pub trait Sequenced: Clone {
    /// Incremental change applied by [`Sequenced::merge`].
    type Delta: Clone;

    /// Nonce the state is currently at.
    fn nonce(&self) -> u64;

    /// Apply `delta` and advance to `nonce`.
    fn merge(&mut self, nonce: u64, delta: &Self::Delta);
}

/// Result of offering a delta to a [`SequencedState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// `nonce == current + 1`; merged.
    Accepted,
    /// `nonce <= current`; discarded without effect.
    Stale,
    /// `nonce > current + 1`; the delta is held and a fresh snapshot is needed.
    GapDetected {
        /// Nonce that would have been accepted.
        expected: u64,
        /// Nonce that arrived.
        received: u64,
    },
    /// A snapshot is outstanding; the delta is held for replay.
    Deferred,
}

/// Result of installing a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeded {
    /// Snapshot installed and held deltas replayed.
    Live {
        /// Nonce after replay.
        nonce: u64,
        /// Number of held deltas merged on top of the snapshot.
        replayed: usize,
    },
    /// Held deltas do not connect to the snapshot; another snapshot is needed.
    GapDetected {
        /// Nonce that would have been accepted.
        expected: u64,
        /// First held nonce past the hole.
        received: u64,
    },
}

enum Phase<T> {
    /// Waiting for a snapshot. Keeps the last good value, if any.
    Syncing(Option<Arc<T>>),
    Live(Arc<T>),
}

/// Authoritative state for one channel.
///
/// Owned and mutated only by the reader task. The value is held in an `Arc`
/// so updates can hand consumers a cheap reference; merging goes through
/// `Arc::make_mut`, which copies only while a consumer still holds the
/// previous version.
pub struct SequencedState<T: Sequenced> {
    phase: Phase<T>,
    pending: VecDeque<(u64, T::Delta)>,
    pending_limit: usize,
    epoch: u64,
}

impl<T: Sequenced> SequencedState<T> {
    /// Create a state that waits for its first snapshot.
    pub fn new(pending_limit: usize) -> Self {
        Self {
            phase: Phase::Syncing(None),
            pending: VecDeque::new(),
            pending_limit: pending_limit.max(1),
            epoch: 0,
        }
    }

    /// Offer a delta.
    pub fn apply(&mut self, nonce: u64, delta: &T::Delta) -> Applied {
        if matches!(self.phase, Phase::Syncing(_)) {
            self.hold(nonce, delta.clone());
            return Applied::Deferred;
        }

        let Phase::Live(value) = &mut self.phase else {
            return Applied::Deferred;
        };

        let current = value.nonce();
        if nonce <= current {
            return Applied::Stale;
        }

        let expected = current + 1;
        if nonce == expected {
            Arc::make_mut(value).merge(nonce, delta);
            return Applied::Accepted;
        }

        let last_good = Arc::clone(value);
        self.phase = Phase::Syncing(Some(last_good));
        self.epoch += 1;
        self.hold(nonce, delta.clone());

        Applied::GapDetected {
            expected,
            received: nonce,
        }
    }

    /// Install a snapshot and replay held deltas on top of it.
    ///
    /// Held deltas the snapshot already covers are dropped.
    pub fn seed(&mut self, snapshot: T) -> Seeded {
        let mut value = snapshot;
        let mut pending = std::mem::take(&mut self.pending);
        pending.make_contiguous().sort_by_key(|(nonce, _)| *nonce);

        let mut replayed = 0;
        while let Some((nonce, delta)) = pending.pop_front() {
            let current = value.nonce();
            if nonce <= current {
                continue;
            }

            if nonce != current + 1 {
                pending.push_front((nonce, delta));
                self.pending = pending;
                self.phase = Phase::Syncing(Some(Arc::new(value)));
                self.epoch += 1;
                return Seeded::GapDetected {
                    expected: current + 1,
                    received: nonce,
                };
            }

            value.merge(nonce, &delta);
            replayed += 1;
        }

        let nonce = value.nonce();
        self.phase = Phase::Live(Arc::new(value));
        Seeded::Live { nonce, replayed }
    }

    /// Discard the value and every held delta; a new snapshot is required.
    ///
    /// Returns whether a value had been established before.
    pub fn reset(&mut self) -> bool {
        let had_value = match &self.phase {
            Phase::Live(_) => true,
            Phase::Syncing(last_good) => last_good.is_some(),
        };

        self.phase = Phase::Syncing(None);
        self.pending.clear();
        self.epoch += 1;
        had_value
    }

    /// Current value, only while live.
    pub fn value(&self) -> Option<&Arc<T>> {
        match &self.phase {
            Phase::Live(value) => Some(value),
            Phase::Syncing(_) => None,
        }
    }

    /// Last value, live or stale.
    pub fn last_value(&self) -> Option<&Arc<T>> {
        match &self.phase {
            Phase::Live(value) => Some(value),
            Phase::Syncing(last_good) => last_good.as_ref(),
        }
    }

    /// Nonce of the current value, only while live.
    pub fn nonce(&self) -> Option<u64> {
        self.value().map(|v| v.nonce())
    }

    /// Whether deltas are being merged.
    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Live(_))
    }

    /// Bumped on every gap and reset; tags snapshot requests.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of held deltas.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn hold(&mut self, nonce: u64, delta: T::Delta) {
        if self.pending.len() >= self.pending_limit {
            if let Some((dropped, _)) = self.pending.pop_front() {
                debug!(dropped, limit = self.pending_limit, "pending delta buffer full");
            }
        }
        self.pending.push_back((nonce, delta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Records every merged delta.
    #[derive(Debug, Clone, PartialEq)]
    struct Log {
        nonce: u64,
        merged: Vec<&'static str>,
    }

    impl Log {
        fn at(nonce: u64) -> Self {
            Self {
                nonce,
                merged: Vec::new(),
            }
        }
    }

    impl Sequenced for Log {
        type Delta = &'static str;

        fn nonce(&self) -> u64 {
            self.nonce
        }

        fn merge(&mut self, nonce: u64, delta: &&'static str) {
            self.nonce = nonce;
            self.merged.push(*delta);
        }
    }

    fn live_at(nonce: u64) -> SequencedState<Log> {
        let mut state = SequencedState::new(16);
        state.seed(Log::at(nonce));
        state
    }

    #[test]
    fn deltas_before_first_snapshot_are_deferred_then_replayed() {
        let mut state = SequencedState::new(16);

        assert_eq!(state.apply(100, &"a"), Applied::Deferred);
        assert_eq!(state.apply(101, &"b"), Applied::Deferred);
        assert_eq!(state.apply(102, &"c"), Applied::Deferred);

        let seeded = state.seed(Log::at(100));

        assert_eq!(seeded, Seeded::Live { nonce: 102, replayed: 2 });
        assert_eq!(state.value().unwrap().merged, vec!["b", "c"]);
    }

    #[test]
    fn consecutive_nonce_is_accepted() {
        let mut state = live_at(100);

        assert_eq!(state.apply(101, &"a"), Applied::Accepted);
        assert_eq!(state.nonce(), Some(101));
    }

    #[test]
    fn stale_delta_has_no_effect() {
        let mut state = live_at(100);
        state.apply(101, &"a");
        let before = state.value().unwrap().as_ref().clone();

        assert_eq!(state.apply(101, &"again"), Applied::Stale);
        assert_eq!(state.apply(50, &"old"), Applied::Stale);

        assert_eq!(state.value().unwrap().as_ref(), &before);
    }

    #[test]
    fn gap_reported_once_then_held_until_snapshot() {
        let mut state = live_at(100);
        assert_eq!(state.apply(101, &"a"), Applied::Accepted);
        let epoch = state.epoch();

        assert_eq!(
            state.apply(103, &"c"),
            Applied::GapDetected { expected: 102, received: 103 }
        );
        assert_eq!(state.apply(104, &"d"), Applied::Deferred);
        assert_eq!(state.apply(105, &"e"), Applied::Deferred);

        assert!(!state.is_live());
        assert_eq!(state.epoch(), epoch + 1);
        assert_eq!(state.last_value().unwrap().merged, vec!["a"]);

        // a fresh snapshot at 103 supersedes the held 103
        let seeded = state.seed(Log::at(103));

        assert_eq!(seeded, Seeded::Live { nonce: 105, replayed: 2 });
        assert_eq!(state.value().unwrap().merged, vec!["d", "e"]);
    }

    #[test]
    fn snapshot_that_leaves_a_hole_asks_again() {
        let mut state = SequencedState::new(16);
        state.apply(110, &"x");

        let epoch = state.epoch();
        let seeded = state.seed(Log::at(105));

        assert_eq!(seeded, Seeded::GapDetected { expected: 106, received: 110 });
        assert_eq!(state.epoch(), epoch + 1);
        assert_eq!(state.pending_len(), 1);

        assert_eq!(
            state.seed(Log::at(109)),
            Seeded::Live { nonce: 110, replayed: 1 }
        );
    }

    #[test]
    fn held_deltas_are_bounded() {
        let mut state = SequencedState::<Log>::new(2);
        state.apply(1, &"a");
        state.apply(2, &"b");
        state.apply(3, &"c");

        assert_eq!(state.pending_len(), 2);
    }

    #[test]
    fn reset_discards_value_and_bumps_epoch() {
        let mut state = live_at(10);
        state.apply(12, &"gap");

        assert!(state.reset());
        assert!(state.last_value().is_none());
        assert_eq!(state.pending_len(), 0);
        assert!(!state.reset());
    }
}
