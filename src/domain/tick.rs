// Wrapping comparisons for 16-bit tick ids.

use super::messages::TickId;

/// Half of the tick id space; ids further apart than this are treated as wrapped.
const HALF_RANGE: u16 = 1 << 15;

/// Returns true if `candidate` was issued after `reference`, allowing for wrap-around.
pub fn is_newer(candidate: TickId, reference: TickId) -> bool {
    let diff = candidate.wrapping_sub(reference);
    diff != 0 && diff < HALF_RANGE
}

/// Number of ticks from `earlier` to `later` on the wrapping tick clock.
pub fn ticks_between(earlier: TickId, later: TickId) -> u16 {
    later.wrapping_sub(earlier)
}
