//! Playlist sequencer state machine.
//!
//! Pure and synchronous: no clocks, no I/O. The deck drives it from both
//! operator commands and end-of-item notifications.

use rand::seq::SliceRandom;
use rand::Rng;

use intercom_core::ids::ContentId;
use intercom_core::playlist::SequencerStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("playlist is empty")]
    EmptyPlaylist,

    #[error("cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: SequencerStatus,
    },
}

/// Position after `index` in a play order of `len` items. Past the end the
/// order wraps to the first item only when `looping` is set.
///
/// Manual skips and automatic end-of-item advances both go through here.
pub fn next_position(index: usize, len: usize, looping: bool) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let next = index + 1;
    if next < len {
        Some(next)
    } else if looping {
        Some(0)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    order: Vec<ContentId>,
    index: usize,
    status: SequencerStatus,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SequencerStatus {
        self.status
    }

    pub fn order(&self) -> &[ContentId] {
        &self.order
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&ContentId> {
        if self.status.has_position() {
            self.order.get(self.index)
        } else {
            None
        }
    }

    /// Build a new play order and start at its first item. Replaces any
    /// order already playing.
    pub fn play<R: Rng + ?Sized>(
        &mut self,
        ids: Vec<ContentId>,
        shuffle: bool,
        rng: &mut R,
    ) -> Result<&ContentId, SequenceError> {
        if ids.is_empty() {
            return Err(SequenceError::EmptyPlaylist);
        }
        let mut order = ids;
        if shuffle {
            order.shuffle(rng);
        }
        self.order = order;
        self.index = 0;
        self.status = SequencerStatus::Playing;
        Ok(&self.order[0])
    }

    /// Discard the play order. Idempotent.
    pub fn stop(&mut self) {
        self.order.clear();
        self.index = 0;
        self.status = SequencerStatus::Stopped;
    }

    pub fn pause(&mut self) -> Result<(), SequenceError> {
        match self.status {
            SequencerStatus::Playing => {
                self.status = SequencerStatus::Paused;
                Ok(())
            }
            status => Err(SequenceError::InvalidState {
                operation: "pause",
                status,
            }),
        }
    }

    pub fn resume(&mut self) -> Result<(), SequenceError> {
        match self.status {
            SequencerStatus::Paused => {
                self.status = SequencerStatus::Playing;
                Ok(())
            }
            status => Err(SequenceError::InvalidState {
                operation: "resume",
                status,
            }),
        }
    }

    pub fn check_seek(&self) -> Result<(), SequenceError> {
        if self.status.has_position() {
            Ok(())
        } else {
            Err(SequenceError::InvalidState {
                operation: "seek",
                status: self.status,
            })
        }
    }

    /// Move to the next item, or stop when the order is exhausted and
    /// `looping` is off. Returns the new current item.
    pub fn advance(&mut self, looping: bool) -> Option<&ContentId> {
        if !self.status.has_position() {
            return None;
        }
        match next_position(self.index, self.order.len(), looping) {
            Some(next) => {
                self.index = next;
                self.order.get(next)
            }
            None => {
                self.stop();
                None
            }
        }
    }

    /// Operator skip. Paused stays paused on the new item.
    pub fn skip_next(&mut self, looping: bool) -> Result<Option<&ContentId>, SequenceError> {
        if !self.status.has_position() {
            return Err(SequenceError::InvalidState {
                operation: "skip",
                status: self.status,
            });
        }
        Ok(self.advance(looping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ids(n: usize) -> Vec<ContentId> {
        (0..n).map(|i| ContentId::from_raw(format!("item_{i}"))).collect()
    }

    #[test]
    fn next_position_rules() {
        assert_eq!(next_position(0, 3, false), Some(1));
        assert_eq!(next_position(2, 3, false), None);
        assert_eq!(next_position(2, 3, true), Some(0));
        assert_eq!(next_position(0, 1, true), Some(0));
        assert_eq!(next_position(0, 0, true), None);
    }

    #[test]
    fn play_rejects_empty() {
        let mut seq = Sequencer::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            seq.play(vec![], false, &mut rng).unwrap_err(),
            SequenceError::EmptyPlaylist
        );
        assert_eq!(seq.status(), SequencerStatus::Idle);
    }

    #[test]
    fn unshuffled_order_is_reproducible() {
        let mut seq = Sequencer::new();
        let mut rng = StdRng::seed_from_u64(1);
        seq.play(ids(5), false, &mut rng).unwrap();
        let first = seq.order().to_vec();
        seq.stop();
        seq.play(ids(5), false, &mut rng).unwrap();
        assert_eq!(seq.order(), first.as_slice());
        assert_eq!(first, ids(5));
    }

    #[test]
    fn shuffled_order_varies_across_trials() {
        let mut rng = rand::thread_rng();
        let mut seq = Sequencer::new();
        let mut orders = std::collections::HashSet::new();
        for _ in 0..20 {
            seq.play(ids(8), true, &mut rng).unwrap();
            orders.insert(seq.order().to_vec());
            seq.stop();
        }
        // 8! orderings; twenty identical draws is effectively impossible.
        assert!(orders.len() > 1);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut seq = Sequencer::new();
        let mut rng = StdRng::seed_from_u64(42);
        seq.play(ids(6), true, &mut rng).unwrap();
        let mut sorted = seq.order().to_vec();
        sorted.sort();
        assert_eq!(sorted, ids(6));
    }

    #[test]
    fn skip_at_end_without_loop_stops() {
        let mut seq = Sequencer::new();
        let mut rng = StdRng::seed_from_u64(1);
        seq.play(ids(2), false, &mut rng).unwrap();
        assert_eq!(seq.skip_next(false).unwrap(), Some(&ids(2)[1]));
        assert_eq!(seq.skip_next(false).unwrap(), None);
        assert_eq!(seq.status(), SequencerStatus::Stopped);
        assert!(seq.order().is_empty());
    }

    #[test]
    fn skip_at_end_with_loop_wraps() {
        let mut seq = Sequencer::new();
        let mut rng = StdRng::seed_from_u64(1);
        seq.play(ids(2), false, &mut rng).unwrap();
        seq.skip_next(true).unwrap();
        assert_eq!(seq.skip_next(true).unwrap(), Some(&ids(2)[0]));
        assert_eq!(seq.status(), SequencerStatus::Playing);
    }

    #[test]
    fn skip_requires_position() {
        let mut seq = Sequencer::new();
        assert!(matches!(
            seq.skip_next(true),
            Err(SequenceError::InvalidState { operation: "skip", .. })
        ));
    }

    #[test]
    fn pause_resume_transitions() {
        let mut seq = Sequencer::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(seq.pause().is_err());
        seq.play(ids(1), false, &mut rng).unwrap();
        seq.pause().unwrap();
        assert_eq!(seq.status(), SequencerStatus::Paused);
        assert!(seq.pause().is_err());
        assert!(seq.check_seek().is_ok());
        seq.resume().unwrap();
        assert_eq!(seq.status(), SequencerStatus::Playing);
        assert!(seq.resume().is_err());
    }

    #[test]
    fn skip_while_paused_keeps_paused() {
        let mut seq = Sequencer::new();
        let mut rng = StdRng::seed_from_u64(1);
        seq.play(ids(3), false, &mut rng).unwrap();
        seq.pause().unwrap();
        seq.skip_next(false).unwrap();
        assert_eq!(seq.status(), SequencerStatus::Paused);
        assert_eq!(seq.current(), Some(&ids(3)[1]));
    }

    #[test]
    fn stop_is_idempotent_and_blocks_seek() {
        let mut seq = Sequencer::new();
        seq.stop();
        seq.stop();
        assert_eq!(seq.status(), SequencerStatus::Stopped);
        assert!(seq.check_seek().is_err());
        assert!(seq.current().is_none());
    }
}
