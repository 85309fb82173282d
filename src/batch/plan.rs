// 🗺️ Work Plan - Lazy, restartable sequence of scrape targets
//
// A selector expands into lanes. A lane is one (kind, year[, bill type]) run
// of consecutive identifiers, produced on demand, never materialized.
// Bill lanes in a full-year scrape stop early after consecutive not-founds.

use crate::model::{BillKey, BillType, Target};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Highest bill number a full-year lane will try
pub const MAX_BILL_NUMBER: u32 = 10_000;

/// Member ids the site hands out
pub const MAX_MEMBER_ID: i64 = 1_500;

/// Consecutive not-found bill numbers that end a full-year lane
pub const BILL_LANE_MISS_LIMIT: u32 = 2;

// ============================================================================
// SELECTOR
// ============================================================================

/// What a run should cover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Selector {
    /// Every bill type (until the lane runs dry) and every member id, for each
    /// year in `first_year..=last_year`. All bill lanes run before member lanes.
    FullYears { first_year: i32, last_year: i32 },

    /// Explicit member id range across years
    MemberRange { first: i64, last: i64, years: Vec<i32> },

    /// Explicit bill number range across types and years
    BillRange {
        first: u32,
        last: u32,
        types: Vec<BillType>,
        years: Vec<i32>,
    },

    /// An explicit list, e.g. the failed identifiers of an earlier run
    Targets { targets: Vec<Target> },

    /// Small fixed sample for smoke-testing a deployment
    Limited,
}

impl Selector {
    /// Default checkpoint name for resumable runs
    pub fn run_name(&self) -> String {
        match self {
            Selector::FullYears { first_year, last_year } if first_year == last_year => {
                format!("full-{}", first_year)
            }
            Selector::FullYears { first_year, last_year } => {
                format!("full-{}-{}", first_year, last_year)
            }
            Selector::MemberRange { first, last, years } => {
                format!("members-{}-{}-{}", first, last, join_years(years))
            }
            Selector::BillRange { first, last, types, years } => {
                let types: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                format!("bills-{}-{}-{}-{}", types.join("+"), first, last, join_years(years))
            }
            Selector::Targets { targets } => format!("targets-{}", targets.len()),
            Selector::Limited => "limited".to_string(),
        }
    }

    fn lanes(&self) -> Vec<Lane> {
        match self {
            Selector::FullYears { first_year, last_year } => {
                let years = *first_year..=*last_year;
                let bills = years.clone().flat_map(|year| {
                    BillType::ALL.iter().map(move |&bill_type| Lane::Bills {
                        bill_type,
                        year,
                        first: 1,
                        last: MAX_BILL_NUMBER,
                        miss_limit: Some(BILL_LANE_MISS_LIMIT),
                    })
                });
                let members = years.map(|year| Lane::Members {
                    year,
                    first: 1,
                    last: MAX_MEMBER_ID,
                });
                bills.chain(members).collect()
            }
            Selector::MemberRange { first, last, years } => years
                .iter()
                .map(|&year| Lane::Members {
                    year,
                    first: *first,
                    last: *last,
                })
                .collect(),
            Selector::BillRange { first, last, types, years } => years
                .iter()
                .flat_map(|&year| {
                    types.iter().map(move |&bill_type| Lane::Bills {
                        bill_type,
                        year,
                        first: *first,
                        last: *last,
                        miss_limit: None,
                    })
                })
                .collect(),
            Selector::Targets { targets } => vec![Lane::Fixed(targets.clone())],
            Selector::Limited => vec![Lane::Fixed(limited_sample())],
        }
    }
}

fn join_years(years: &[i32]) -> String {
    years.iter().map(|y| y.to_string()).collect::<Vec<_>>().join("+")
}

/// SB1-5 and HB1-5, then a spread of member ids, all for 2025
pub fn limited_sample() -> Vec<Target> {
    const YEAR: i32 = 2025;
    const MEMBERS: [i64; 10] = [1, 7, 12, 25, 50, 100, 150, 200, 250, 253];

    let bills = [BillType::SB, BillType::HB]
        .into_iter()
        .flat_map(|bill_type| (1..=5).map(move |n| Target::Bill(BillKey::new(bill_type, n, YEAR))));
    let members = MEMBERS
        .iter()
        .map(|&member_id| Target::Member { member_id, year: YEAR });

    bills.chain(members).collect()
}

// ============================================================================
// LANES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lane {
    Bills {
        bill_type: BillType,
        year: i32,
        first: u32,
        last: u32,
        miss_limit: Option<u32>,
    },
    Members {
        year: i32,
        first: i64,
        last: i64,
    },
    Fixed(Vec<Target>),
}

impl Lane {
    fn len(&self) -> usize {
        match self {
            Lane::Bills { first, last, .. } => span(i64::from(*first), i64::from(*last)),
            Lane::Members { first, last, .. } => span(*first, *last),
            Lane::Fixed(targets) => targets.len(),
        }
    }

    fn target(&self, index: usize) -> Option<Target> {
        if index >= self.len() {
            return None;
        }
        match self {
            Lane::Bills { bill_type, year, first, .. } => {
                let number = first.checked_add(u32::try_from(index).ok()?)?;
                Some(Target::Bill(BillKey::new(*bill_type, number, *year)))
            }
            Lane::Members { year, first, .. } => {
                let member_id = first.checked_add(i64::try_from(index).ok()?)?;
                Some(Target::Member { member_id, year: *year })
            }
            Lane::Fixed(targets) => targets.get(index).copied(),
        }
    }

    fn miss_limit(&self) -> Option<u32> {
        match self {
            Lane::Bills { miss_limit, .. } => *miss_limit,
            _ => None,
        }
    }
}

fn span(first: i64, last: i64) -> usize {
    if last < first {
        0
    } else {
        usize::try_from(last - first + 1).unwrap_or(usize::MAX)
    }
}

// ============================================================================
// CHECKPOINT
// ============================================================================

/// Progress of one lane, persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneProgress {
    /// Every index below this one has completed
    pub resume_at: usize,
    pub consecutive_misses: u32,
    pub exhausted: bool,
}

/// Where a plan stands. Restoring it re-issues anything that was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub selector: Selector,
    pub lanes: Vec<LaneProgress>,
}

// ============================================================================
// WORK PLAN
// ============================================================================

/// One unit of work: fetch → parse → upsert for a single target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub lane: usize,
    pub index: usize,
    pub target: Target,
}

#[derive(Debug, Clone, Default)]
struct LaneState {
    next: usize,
    in_flight: BTreeSet<usize>,
    consecutive_misses: u32,
    exhausted: bool,
}

impl LaneState {
    fn resume_at(&self) -> usize {
        self.in_flight.iter().next().copied().unwrap_or(self.next)
    }
}

#[derive(Debug, Clone)]
pub struct WorkPlan {
    selector: Selector,
    lanes: Vec<Lane>,
    state: Vec<LaneState>,
    current: usize,
}

impl WorkPlan {
    pub fn new(selector: Selector) -> Self {
        let lanes = selector.lanes();
        let state = vec![LaneState::default(); lanes.len()];
        WorkPlan {
            selector,
            lanes,
            state,
            current: 0,
        }
    }

    /// Rebuild a plan from a saved checkpoint. A checkpoint taken for a
    /// different selector is ignored and the plan starts fresh.
    pub fn resume(selector: Selector, checkpoint: &Checkpoint) -> Self {
        let mut plan = WorkPlan::new(selector);
        if checkpoint.selector != plan.selector || checkpoint.lanes.len() != plan.lanes.len() {
            return plan;
        }
        for (state, saved) in plan.state.iter_mut().zip(&checkpoint.lanes) {
            state.next = saved.resume_at;
            state.consecutive_misses = saved.consecutive_misses;
            state.exhausted = saved.exhausted;
        }
        plan
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Upper bound on items left (lanes may stop early)
    pub fn remaining_hint(&self) -> usize {
        self.lanes
            .iter()
            .zip(&self.state)
            .filter(|(_, s)| !s.exhausted)
            .map(|(lane, s)| lane.len().saturating_sub(s.next))
            .sum()
    }

    /// Next target to issue, or None when every lane is done
    pub fn next_item(&mut self) -> Option<WorkItem> {
        while self.current < self.lanes.len() {
            let lane = &self.lanes[self.current];
            let state = &mut self.state[self.current];

            if !state.exhausted {
                if let Some(target) = lane.target(state.next) {
                    let item = WorkItem {
                        lane: self.current,
                        index: state.next,
                        target,
                    };
                    state.in_flight.insert(state.next);
                    state.next += 1;
                    return Some(item);
                }
                state.exhausted = true;
            }
            self.current += 1;
        }
        None
    }

    /// Feed an item's outcome back. `found == false` means the identifier
    /// does not exist upstream; lanes with a miss limit stop on a run of them.
    pub fn complete(&mut self, item: &WorkItem, found: bool) {
        let Some(state) = self.state.get_mut(item.lane) else { return };
        state.in_flight.remove(&item.index);

        if found {
            state.consecutive_misses = 0;
            return;
        }
        state.consecutive_misses += 1;
        if let Some(limit) = self.lanes[item.lane].miss_limit() {
            if state.consecutive_misses >= limit && !state.exhausted {
                state.exhausted = true;
                tracing::info!(
                    lane = item.lane,
                    stopped_at = %item.target,
                    misses = state.consecutive_misses,
                    "Lane exhausted"
                );
            }
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            selector: self.selector.clone(),
            lanes: self
                .state
                .iter()
                .map(|s| LaneProgress {
                    resume_at: s.resume_at(),
                    consecutive_misses: s.consecutive_misses,
                    exhausted: s.exhausted,
                })
                .collect(),
        }
    }
}

impl Iterator for WorkPlan {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        self.next_item()
    }
}

// ============================================================================
// TESTS
// ============================================================================
