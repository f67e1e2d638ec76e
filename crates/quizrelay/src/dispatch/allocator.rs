//! Round-robin channel allocation over fixed worker pools.
//!
//! Each family owns one atomic cursor. A `fetch_add` followed by a modulo
//! hands every caller a distinct pre-increment value, so over any window of
//! `M` allocations the per-channel counts differ by at most one.

use crate::config::RelayConfig;
use portable_atomic::{AtomicUsize, Ordering};
use quizrelay_core::{Channel, Family};

/// Hands out request channels of each family in rotation.
#[derive(Debug)]
pub struct ChannelAllocator {
    pool_sizes: [usize; 2],
    cursors: [AtomicUsize; 2],
}

impl ChannelAllocator {
    /// Builds an allocator for the configured pool sizes.
    ///
    /// Pool sizes are validated by [`RelayConfig::validate`]; a zero size is
    /// clamped to one so allocation can never divide by zero.
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_pool_sizes(config.question.pool_size, config.explanation.pool_size)
    }

    pub fn with_pool_sizes(question: usize, explanation: usize) -> Self {
        Self {
            pool_sizes: [question.max(1), explanation.max(1)],
            cursors: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    /// Returns the next channel of `family`.
    pub fn next_channel(&self, family: Family) -> Channel {
        let slot = family.index();
        let index = self.cursors[slot].fetch_add(1, Ordering::Relaxed) % self.pool_sizes[slot];
        Channel::new(family, index)
    }

    pub const fn pool_size(&self, family: Family) -> usize {
        self.pool_sizes[family.index()]
    }

    /// Every request channel of `family`, in index order.
    pub fn channels(&self, family: Family) -> impl Iterator<Item = Channel> {
        (0..self.pool_size(family)).map(move |index| Channel::new(family, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, sync::Arc};

    #[test]
    fn rotates_through_the_pool() {
        let allocator = ChannelAllocator::with_pool_sizes(3, 1);
        let names: Vec<_> = (0..4)
            .map(|_| allocator.next_channel(Family::Question).name())
            .collect();
        assert_eq!(
            names,
            [
                "QuestionRequest1",
                "QuestionRequest2",
                "QuestionRequest3",
                "QuestionRequest1"
            ]
        );
    }

    #[test]
    fn single_worker_pool_always_yields_the_same_channel() {
        let allocator = ChannelAllocator::with_pool_sizes(1, 1);
        for _ in 0..10 {
            assert_eq!(
                allocator.next_channel(Family::Explanation),
                Channel::new(Family::Explanation, 0)
            );
        }
    }

    #[test]
    fn families_rotate_independently() {
        let allocator = ChannelAllocator::with_pool_sizes(2, 2);
        allocator.next_channel(Family::Question);
        assert_eq!(allocator.next_channel(Family::Explanation).index(), 0);
        assert_eq!(allocator.next_channel(Family::Question).index(), 1);
    }

    #[test]
    fn channels_lists_the_whole_pool() {
        let allocator = ChannelAllocator::with_pool_sizes(2, 4);
        let names: Vec<_> = allocator
            .channels(Family::Explanation)
            .map(|c| c.name())
            .collect();
        assert_eq!(names.len(), 4);
        assert_eq!(names[3], "ExplanationRequest4");
    }

    #[test]
    fn concurrent_allocation_is_balanced() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1_003;
        const POOL: usize = 5;

        let allocator = Arc::new(ChannelAllocator::with_pool_sizes(POOL, 1));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|_| allocator.next_channel(Family::Question).index())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                *counts.entry(index).or_default() += 1;
            }
        }

        assert_eq!(counts.len(), POOL);
        let min = counts.values().min().copied().unwrap();
        let max = counts.values().max().copied().unwrap();
        assert!(max - min <= 1, "unbalanced allocation: {counts:?}");
    }
}
