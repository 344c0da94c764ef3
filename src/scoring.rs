//! Analytic cell-scoring model.
//!
//! Scores how valuable each cell is for a given unit by projecting decayed
//! extraction over the next `horizon` turns, charging travel there and back,
//! and rewarding local resource concentration and depot proximity. Two
//! forms share one kernel: the upper-bound estimate charges an average
//! movement cost from pure distances (no pathfinding) and is used to rank
//! units for scheduling and to evaluate depot sites; the exact form charges
//! the unit's true shortest-path cost and is used to pick mining targets.
//!
//! All computation is batched over whole-grid arrays, one pass per
//! time-offset; this is the dominant per-turn cost and the batched shape is
//! deliberate.

use crate::grid::*;
use crate::location::Location;

/// Shared per-turn inputs to the scoring kernel, borrowed from the turn
/// state.
pub struct ScoreParams<'a> {
    pub dims: GridDims,
    pub horizon: usize,
    pub max_cargo: f32,
    pub move_cost_ratio: f32,
    /// Fraction of a cell's resource left after one extraction.
    pub extract_base: f32,
    pub concentration: f32,
    pub num_players: usize,
    pub avg_resource: f32,
    pub resource: &'a GridArray<f32>,
    /// Gaussian-smoothed resource density, normalized to [0, 1].
    pub smoothed_norm: &'a GridArray<f32>,
    pub depot_distance: &'a GridArray<f32>,
    pub depot_cost: &'a GridArray<f32>,
    pub enemy_proximity: &'a GridArray<f32>,
    pub flags: &'a GridArray<CellFlags>,
}

/// Per-unit grids reused by every scoring call for that unit this turn.
pub struct UnitFields {
    /// Wrapped distance from the unit to every cell.
    pub dist: GridArray<f32>,
    /// `extract_base ^ dist`, so the decay factor at time-offset `t` is
    /// `base^t / decay` clamped to [0, 1].
    decay: GridArray<f32>,
    /// Cell resource, tripled on contested cells in 4-player games (an
    /// enemy crowd nearby means the cell will be fought over soon, so
    /// nearby value counts extra).
    boosted: GridArray<f32>,
    /// Cargo capacity the unit has left.
    pub capacity_left: f32,
}

pub fn unit_fields(p: &ScoreParams, pos: Location, cargo: u32) -> UnitFields {
    let dist = GridArray::fill_with(p.dims, |loc| p.dims.distance(pos, loc) as f32);

    let decay = GridArray::fill_with(p.dims, |loc| p.extract_base.powf(dist.get(loc)));

    let contested = p.num_players > 2;
    let boosted = GridArray::fill_with(p.dims, |loc| {
        let amount = p.resource.get(loc);
        if contested && p.enemy_proximity.get(loc) >= 2.0 && dist.get(loc) < 5.0 {
            amount * 3.0
        } else {
            amount
        }
    });

    UnitFields {
        dist,
        decay,
        boosted,
        capacity_left: (p.max_cargo - cargo as f32).max(0.0),
    }
}

/// Resource recoverable from a cell by time-offset `t`, given the unit
/// needs `dist` turns to arrive: `amount * (1 - base^(t - dist))`, clamped
/// to the unit's remaining capacity.
#[inline]
fn mineable(uf: &UnitFields, base_t: f32, i: usize) -> f32 {
    let fraction = 1.0 - (base_t / uf.decay.as_slice()[i]).min(1.0);
    (uf.boosted.as_slice()[i] * fraction).min(uf.capacity_left)
}

/// Shared kernel: best score over all (cell, time-offset) pairs, charging
/// movement at grid-average density over `move_dist + dist_from_unit`
/// steps. `move_dist` is the depot-distance field, or a substituted field
/// when evaluating a candidate depot site.
fn estimate_kernel(p: &ScoreParams, uf: &UnitFields, move_dist: &GridArray<f32>) -> f32 {
    let area = p.dims.area();
    let move_rate = p.avg_resource / p.move_cost_ratio;
    let mut best = 0.0f32;

    for t in 1..=p.horizon {
        let base_t = p.extract_base.powi(t as i32);
        let tf = t as f32;
        for i in 0..area {
            let travel = (move_dist.as_slice()[i] + uf.dist.as_slice()[i]) * move_rate;
            let net = mineable(uf, base_t, i) - travel;
            if net > 0.0 {
                let bonus = 1.0 + p.concentration * p.smoothed_norm.as_slice()[i];
                let denom = (tf + uf.dist.as_slice()[i]) * p.max_cargo / net
                    + p.depot_distance.as_slice()[i];
                let score = (p.max_cargo - p.depot_cost.as_slice()[i]) * bonus / denom;
                if score > best {
                    best = score;
                }
            }
        }
    }

    best
}

/// Upper-bound estimate of the best value this unit could achieve anywhere
/// on the map. No pathfinding; used to order units in the mining queue and
/// as the per-unit term of depot-site evaluation.
pub fn best_estimate(p: &ScoreParams, uf: &UnitFields) -> f32 {
    estimate_kernel(p, uf, p.depot_distance)
}

/// Upper-bound estimate with the movement-cost distance replaced by
/// `min(depot distance, distance to a candidate site)` — the unit's value
/// if the site existed, without re-routing anything.
pub fn site_estimate(p: &ScoreParams, uf: &UnitFields, site_dist: &GridArray<f32>) -> f32 {
    let substituted = GridArray::fill_with(p.dims, |loc| {
        p.depot_distance.get(loc).min(site_dist.get(loc))
    });
    estimate_kernel(p, uf, &substituted)
}

/// Exact per-cell scores for a unit, substituting the unit's true travel
/// cost to each cell (infinite where the local search pruned). In 4-player
/// games, cells adjacent to enemy units score zero.
pub fn cell_scores(p: &ScoreParams, uf: &UnitFields, travel: &GridArray<f32>) -> GridArray<f32> {
    let area = p.dims.area();
    let mut out = GridArray::new(p.dims, 0.0f32);

    for t in 1..=p.horizon {
        let base_t = p.extract_base.powi(t as i32);
        let tf = t as f32;
        let slice = out.as_mut_slice();
        for i in 0..area {
            let net = mineable(uf, base_t, i) - travel.as_slice()[i];
            if net > 0.0 {
                let bonus = 1.0 + p.concentration * p.smoothed_norm.as_slice()[i];
                let denom = (tf + uf.dist.as_slice()[i]) * p.max_cargo / net
                    + p.depot_distance.as_slice()[i];
                let score = (p.max_cargo - p.depot_cost.as_slice()[i]) * bonus / denom;
                if score > slice[i] {
                    slice[i] = score;
                }
            }
        }
    }

    if p.num_players > 2 {
        let flags = p.flags.as_slice();
        let slice = out.as_mut_slice();
        for i in 0..area {
            if flags[i].contains(CellFlags::THREAT_ADJACENT) {
                slice[i] = 0.0;
            }
        }
    }

    out
}
