//! Pool connectivity state and selection.

use std::fmt;

/// Connectivity state of one native pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Never connected, or the last connect attempt failed.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and able to serve leases.
    Connected,
    /// Closed by the owner; never reopened.
    Closed,
}

impl PoolState {
    /// Check if the pool can serve leases without connecting first.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which preference tier produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SelectionTier {
    /// Connected with no leases.
    Idle,
    /// Not yet connected; the caller must connect it.
    Unconnected,
    /// Connected with fewer leases than the saturation threshold.
    Unsaturated,
    /// Connected, regardless of load.
    AnyConnected,
}

/// The outcome of [`select_pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Position of the chosen pool.
    pub index: usize,
    /// Tier the pool was chosen from.
    pub tier: SelectionTier,
}

impl Selection {
    /// Check if the chosen pool has to be connected before use.
    #[must_use]
    pub fn needs_connect(&self) -> bool {
        self.tier == SelectionTier::Unconnected
    }
}

/// Pick a pool for a new lease.
///
/// `pools` yields `(state, leases)` per pool, in set order. The first pool
/// of the best tier wins:
///
/// 1. connected and idle;
/// 2. disconnected or connecting;
/// 3. connected with fewer than `saturation` leases;
/// 4. any connected pool.
///
/// Closed pools are never selected. Returns `None` when nothing qualifies.
#[must_use]
pub fn select_pool<I>(pools: I, saturation: u32) -> Option<Selection>
where
    I: IntoIterator<Item = (PoolState, u32)>,
{
    let mut best: Option<Selection> = None;

    for (index, (state, leases)) in pools.into_iter().enumerate() {
        let tier = match state {
            PoolState::Connected if leases == 0 => SelectionTier::Idle,
            PoolState::Disconnected | PoolState::Connecting => SelectionTier::Unconnected,
            PoolState::Connected if leases < saturation => SelectionTier::Unsaturated,
            PoolState::Connected => SelectionTier::AnyConnected,
            PoolState::Closed => continue,
        };

        if tier == SelectionTier::Idle {
            return Some(Selection { index, tier });
        }
        if best.is_none_or(|b| tier < b.tier) {
            best = Some(Selection { index, tier });
        }
    }

    best
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use PoolState::*;

    #[test]
    fn test_idle_connected_wins() {
        let pick = select_pool([(Connected, 3), (Disconnected, 0), (Connected, 0)], 5);
        assert_eq!(
            pick,
            Some(Selection {
                index: 2,
                tier: SelectionTier::Idle
            })
        );
    }

    #[test]
    fn test_unconnected_before_busy() {
        let pick = select_pool([(Connected, 1), (Disconnected, 0)], 5).unwrap();
        assert_eq!(pick.index, 1);
        assert!(pick.needs_connect());
    }

    #[test]
    fn test_connecting_counts_as_unconnected() {
        let pick = select_pool([(Connected, 7), (Connecting, 0)], 5).unwrap();
        assert_eq!(pick.index, 1);
        assert_eq!(pick.tier, SelectionTier::Unconnected);
    }

    #[test]
    fn test_unsaturated_then_any() {
        let pick = select_pool([(Connected, 9), (Connected, 4)], 5).unwrap();
        assert_eq!(pick.index, 1);
        assert_eq!(pick.tier, SelectionTier::Unsaturated);

        let pick = select_pool([(Connected, 9), (Connected, 6)], 5).unwrap();
        assert_eq!(pick.index, 0);
        assert_eq!(pick.tier, SelectionTier::AnyConnected);
    }

    #[test]
    fn test_single_busy_pool_is_still_selected() {
        let pick = select_pool([(Connected, 10)], 5).unwrap();
        assert_eq!(pick.index, 0);
    }

    #[test]
    fn test_closed_pools_are_skipped() {
        assert_eq!(select_pool([(Closed, 0), (Closed, 0)], 5), None);
        assert_eq!(select_pool(std::iter::empty(), 5), None);
    }
}
