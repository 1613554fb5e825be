use std::collections::HashMap;
use std::hash::Hash;

use chrono::NaiveDate;

// ── Lane Allocation ───────────────────────────────────────────────

/// Input to [`compute_lanes`]. Dates are inclusive and unvalidated:
/// an interval with `start > end` is dropped, not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneInterval<K> {
    pub id: K,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl<K> LaneInterval<K> {
    pub fn new(id: K, start: NaiveDate, end: NaiveDate) -> Self {
        Self { id, start, end }
    }
}

/// Where one interval lands in its calendar row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneSlot {
    pub lane: usize,
    /// Lanes used by the whole visible set. Same for every slot of one call.
    pub total_lanes: usize,
}

/// Pack the intervals visible in `[window_start, window_end]` into the fewest
/// lanes such that no two intervals sharing a lane share a day.
///
/// Greedy first-fit over a stable sort by start date: equal starts keep input
/// order, so identical input always yields identical lanes. A lane is free for
/// an interval only if its last occupant ended strictly before the interval's
/// start day.
pub fn compute_lanes<K>(
    intervals: &[LaneInterval<K>],
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> HashMap<K, LaneSlot>
where
    K: Eq + Hash + Clone,
{
    let mut visible: Vec<&LaneInterval<K>> = intervals
        .iter()
        .filter(|i| i.start <= i.end)
        .filter(|i| i.start <= window_end && i.end >= window_start)
        .collect();
    if visible.is_empty() {
        return HashMap::new();
    }
    // sort_by_key is stable.
    visible.sort_by_key(|i| i.start);

    let mut lane_ends: Vec<NaiveDate> = Vec::new();
    let mut placed: Vec<(&K, usize)> = Vec::with_capacity(visible.len());

    for interval in visible {
        let lane = match lane_ends.iter().position(|end| *end < interval.start) {
            Some(lane) => {
                lane_ends[lane] = interval.end;
                lane
            }
            None => {
                lane_ends.push(interval.end);
                lane_ends.len() - 1
            }
        };
        placed.push((&interval.id, lane));
    }

    let total_lanes = lane_ends.len();
    placed
        .into_iter()
        .map(|(id, lane)| (id.clone(), LaneSlot { lane, total_lanes }))
        .collect()
}
