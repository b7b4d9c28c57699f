//! Memory channel arbiter.
//!
//! Many logical requesters (cores on the instruction side, lanes on the
//! data side) share a small fixed pool of physical memory channels. The
//! arbiter is an explicit channel→requester table, recomputed once per
//! cycle from an ordered scan of the pending requests:
//!
//! - New grants go to free channels in ascending requester id — stable and
//!   deterministic, so the same contention pattern always resolves the
//!   same way.
//! - A granted requester keeps its channel until its response is delivered
//!   and [`ChannelArbiter::release`] is called; it is never re-arbitrated
//!   mid-transaction.
//! - An ungranted requester simply stays pending and is offered again next
//!   cycle with the same priority. Re-offering an identical request is
//!   free of side effects beyond eventual acceptance.
//!
//! Lower-id requesters can starve higher-id ones only while they have
//! continuous pending work, which the lock-step pipeline prevents: every
//! lane issues at most one outstanding request per stall period.

use smallvec::SmallVec;

/// Aggregate grant statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    /// Requests granted a channel.
    pub grants: u64,
    /// Request-cycles spent pending with no free channel.
    pub deferred: u64,
}

/// Channel→requester assignment table for one memory.
#[derive(Debug)]
pub struct ChannelArbiter {
    slots: Vec<Option<usize>>,
    stats: ArbiterStats,
}

impl ChannelArbiter {
    /// Create an arbiter over `num_channels` physical channels.
    pub fn new(num_channels: usize) -> Self {
        Self {
            slots: vec![None; num_channels],
            stats: ArbiterStats::default(),
        }
    }

    /// Drop all assignments and statistics.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.stats = ArbiterStats::default();
    }

    /// Number of physical channels.
    pub fn num_channels(&self) -> usize {
        self.slots.len()
    }

    /// The channel currently bound to `requester`, if any.
    pub fn channel_of(&self, requester: usize) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(requester))
    }

    /// The requester currently bound to `channel`, if any.
    pub fn requester_on(&self, channel: usize) -> Option<usize> {
        self.slots[channel]
    }

    /// Unbind `channel` after its response has been delivered.
    pub fn release(&mut self, channel: usize) {
        self.slots[channel] = None;
    }

    /// Grant free channels to pending requesters for this cycle.
    ///
    /// `pending` holds requester ids with no bound channel; ids already
    /// bound are ignored. Grants are made in ascending requester id and
    /// returned as `(channel, requester)` pairs.
    pub fn arbitrate(&mut self, pending: &[usize]) -> SmallVec<[(usize, usize); 4]> {
        let mut waiting: SmallVec<[usize; 8]> = pending
            .iter()
            .copied()
            .filter(|r| self.channel_of(*r).is_none())
            .collect();
        waiting.sort_unstable();
        waiting.dedup();

        let mut grants = SmallVec::new();
        for requester in waiting {
            match self.slots.iter().position(|s| s.is_none()) {
                Some(channel) => {
                    self.slots[channel] = Some(requester);
                    self.stats.grants += 1;
                    grants.push((channel, requester));
                }
                None => {
                    self.stats.deferred += 1;
                }
            }
        }
        grants
    }

    /// Grant statistics since the last reset.
    pub fn stats(&self) -> ArbiterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grants_lowest_id_first() {
        let mut arb = ChannelArbiter::new(2);
        let grants = arb.arbitrate(&[7, 2, 5]);
        assert_eq!(grants.as_slice(), &[(0, 2), (1, 5)]);
        // Requester 7 stays pending.
        assert_eq!(arb.channel_of(7), None);
        assert_eq!(arb.stats().deferred, 1);
    }

    #[test]
    fn test_one_requester_per_channel() {
        let mut arb = ChannelArbiter::new(2);
        arb.arbitrate(&[0, 1, 2]);
        assert_eq!(arb.requester_on(0), Some(0));
        assert_eq!(arb.requester_on(1), Some(1));

        // No channel ever carries two requesters; a bound requester is
        // never granted a second channel.
        let grants = arb.arbitrate(&[0, 1, 2]);
        assert!(grants.is_empty());
        assert_eq!(arb.channel_of(0), Some(0));
        assert_eq!(arb.channel_of(1), Some(1));
    }

    #[test]
    fn test_pending_never_dropped() {
        let mut arb = ChannelArbiter::new(1);
        arb.arbitrate(&[3, 4]);
        assert_eq!(arb.channel_of(3), Some(0));

        // Re-offer across cycles while the channel is busy: no change.
        for _ in 0..3 {
            assert!(arb.arbitrate(&[4]).is_empty());
        }

        // After release, the waiting requester wins the freed channel.
        arb.release(0);
        let grants = arb.arbitrate(&[4]);
        assert_eq!(grants.as_slice(), &[(0, 4)]);
    }

    #[test]
    fn test_idempotent_reoffer() {
        let mut arb = ChannelArbiter::new(1);
        let first = arb.arbitrate(&[6]);
        assert_eq!(first.as_slice(), &[(0, 6)]);

        // The same requester re-offering while bound changes nothing.
        for _ in 0..5 {
            assert!(arb.arbitrate(&[6]).is_empty());
            assert_eq!(arb.channel_of(6), Some(0));
        }
        assert_eq!(arb.stats().grants, 1);
    }

    #[test]
    fn test_release_discards_mapping() {
        let mut arb = ChannelArbiter::new(1);
        arb.arbitrate(&[9]);
        arb.release(0);
        assert_eq!(arb.requester_on(0), None);
        assert_eq!(arb.channel_of(9), None);
    }

    #[test]
    fn test_reset() {
        let mut arb = ChannelArbiter::new(2);
        arb.arbitrate(&[1, 2, 3]);
        arb.reset();
        assert_eq!(arb.requester_on(0), None);
        assert_eq!(arb.stats(), ArbiterStats::default());
    }
}
