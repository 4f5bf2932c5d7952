use cnconfig::{GLOBAL_INDEXES_OBSCURITY, MAX_BLOCK_NUMBER};

/// Seconds since the unix epoch
pub fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Scan start timestamp for a brand new wallet, a hundred blocks before now
pub fn current_timestamp_adjusted(block_target_time: u64) -> u64 {
    now().saturating_sub(100 * block_target_time)
}

/// Whether an output with `unlock_time` can be spent at `current_height`.
///
/// Unlock times below [`MAX_BLOCK_NUMBER`] are block heights, anything else is a unix timestamp.
pub fn is_input_unlocked(unlock_time: u64, current_height: u64) -> bool {
    is_input_unlocked_at(unlock_time, current_height, now())
}

pub(crate) fn is_input_unlocked_at(unlock_time: u64, current_height: u64, now: u64) -> bool {
    if unlock_time >= MAX_BLOCK_NUMBER {
        now >= unlock_time
    } else {
        current_height.saturating_add(1) >= unlock_time
    }
}

/// Height range to request global indexes for, widened so the daemon can not tell which block
/// we are interested in
pub fn obscured_global_index_range(block_height: u64) -> (u64, u64) {
    let start_height = (block_height / GLOBAL_INDEXES_OBSCURITY) * GLOBAL_INDEXES_OBSCURITY;
    (start_height, start_height.saturating_add(GLOBAL_INDEXES_OBSCURITY))
}

/// Number of decimal digits in `amount`, 0 for 0
pub fn digit_count(amount: u64) -> u32 {
    amount.checked_ilog10().map_or(0, |digits| digits + 1)
}
