use crate::repository::{ContractRepository, Database};
use alloy_primitives::Address;
use anyhow::Result;

/// Most blocks a poller advances in one tick.
pub const BLOCK_WINDOW: u64 = 30;

/// Inclusive block range scanned by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from: u64,
    pub to: u64,
}

impl ScanWindow {
    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }
}

/// End of the next scan window: the head when it is less than `window` blocks
/// away, `last_filter_block + window` otherwise.
///
/// A head behind the watermark (a lagging RPC node) yields the watermark
/// itself, so the cursor never moves backwards.
pub fn next_window(last_filter_block: u64, current_block: u64, window: u64) -> u64 {
    if current_block <= last_filter_block {
        return last_filter_block;
    }
    if current_block - last_filter_block < window {
        current_block
    } else {
        last_filter_block + window
    }
}

pub fn scan_window(last_filter_block: u64, current_block: u64, window: u64) -> ScanWindow {
    ScanWindow {
        from: last_filter_block,
        to: next_window(last_filter_block, current_block, window),
    }
}

/// Per-contract watermark, persisted next to the contract metadata.
#[derive(Clone)]
pub struct CursorStore {
    db: Database,
}

impl CursorStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn load(&self, network_id: u64, address: &Address) -> Result<Option<u64>> {
        self.db.with_conn(|conn| {
            ContractRepository::new(conn).get_last_filter_block(network_id, address)
        })
    }

    pub fn advance(&self, network_id: u64, address: &Address, end_block: u64) -> Result<()> {
        self.db.with_conn(|conn| {
            ContractRepository::new(conn).advance_last_filter_block(network_id, address, end_block)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catches_up_in_fixed_steps() {
        assert_eq!(next_window(100, 200, BLOCK_WINDOW), 130);
        assert_eq!(next_window(130, 200, BLOCK_WINDOW), 160);
        assert_eq!(next_window(190, 200, BLOCK_WINDOW), 200);
    }

    #[test]
    fn exactly_one_window_behind_takes_a_full_step() {
        assert_eq!(next_window(100, 130, BLOCK_WINDOW), 130);
        assert_eq!(next_window(100, 129, BLOCK_WINDOW), 129);
    }

    #[test]
    fn never_exceeds_the_window_or_goes_backwards() {
        for start in [0u64, 1, 29, 30, 1_000] {
            for head in [0u64, 1, 15, 30, 31, 59, 60, 5_000] {
                let end = next_window(start, head, BLOCK_WINDOW);
                assert!(end <= start + BLOCK_WINDOW);
                assert!(end >= start);
                if head >= start {
                    assert!(end <= head);
                }
            }
        }
    }

    #[test]
    fn head_behind_cursor_is_an_empty_window() {
        let window = scan_window(150, 140, BLOCK_WINDOW);
        assert_eq!(window, ScanWindow { from: 150, to: 150 });
        assert!(window.is_empty());
    }
}
