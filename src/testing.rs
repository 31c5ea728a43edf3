use std::cell::Cell;

thread_local! {
    /// Whether the last memoized call on this thread was served from a cache.
    static LAST_WAS_HIT: Cell<bool> = const { Cell::new(false) };
}

/// Whether the last memoized call on this thread was a cache hit.
///
/// Calls that fail before they finish do not update this flag.
pub fn last_was_hit() -> bool {
    LAST_WAS_HIT.with(Cell::get)
}

/// Record the outcome of the call that just finished.
pub(crate) fn record(hit: bool) {
    LAST_WAS_HIT.with(|cell| cell.set(hit))
}
