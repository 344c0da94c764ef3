//! Per-unit pathfinding.
//!
//! `mining_search` is a bounded single-source Dijkstra producing a travel
//! cost grid and predecessor map, from which the first step toward any
//! chosen target is reconstructed. `depot_search` is a goal-directed
//! best-first search for returning and depot-building units. Both share
//! one cost model: moving onto a cell costs that cell's resource divided
//! by the move-cost ratio. `fast_mining_step` is the 1-step greedy
//! fallback used when the turn deadline is imminent.

use crate::constants::*;
use crate::grid::*;
use crate::location::Location;
use crate::model::*;
use fnv::FnvHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Fixed-point scale so path costs order as integers.
const SCALE: u64 = 1000;

/// Borrowed view of the turn grids a search needs.
pub struct SearchGrid<'a> {
    pub dims: GridDims,
    pub num_players: usize,
    pub move_cost_ratio: u32,
    pub my_id: PlayerId,
    pub avg_resource: f32,
    pub resource: &'a GridArray<f32>,
    pub occupancy: &'a GridArray<Option<UnitId>>,
    pub flags: &'a GridArray<CellFlags>,
    pub units: &'a FnvHashMap<UnitId, Unit>,
    /// Own depot cells; never valid mining destinations.
    pub depot_cells: &'a [Location],
    pub depot_distance: &'a GridArray<f32>,
    /// Coarse smoothed resource density, for the greedy fallback.
    pub density_coarse: &'a GridArray<f32>,
}

impl SearchGrid<'_> {
    #[inline]
    fn edge_cost(&self, loc: Location) -> u64 {
        (self.resource.get(loc).max(0.0) * SCALE as f32) as u64 / self.move_cost_ratio as u64
    }

    /// True if the unit can pay the toll for moving off its current cell.
    pub fn can_pay_toll(&self, unit: &Unit) -> bool {
        unit.cargo as f32 >= self.resource.get(unit.pos) / self.move_cost_ratio as f32
    }

    /// A friendly occupant that must not be stepped on: it is mining in
    /// place, committed to a move already, or holding a build site.
    fn blocking_friendly(&self, loc: Location) -> bool {
        let Some(id) = self.occupancy.get(loc) else {
            return false;
        };
        let Some(unit) = self.units.get(&id) else {
            return false;
        };
        if unit.owner != self.my_id {
            return false;
        }
        match unit.role {
            Some(Role::Mining) | Some(Role::DepotBuilding) => true,
            Some(Role::Returning) => unit.next.is_some(),
            _ => false,
        }
    }

    fn enemy_occupied(&self, loc: Location) -> bool {
        self.occupancy
            .get(loc)
            .and_then(|id| self.units.get(&id))
            .map(|u| u.owner != self.my_id)
            .unwrap_or(false)
    }
}

/// Output of `mining_search`: the pure travel cost to every reached cell
/// (infinite where pruned or forbidden) and the predecessor of each
/// reached cell on its cheapest path.
pub struct PathField {
    pub cost: GridArray<f32>,
    parents: FnvHashMap<Location, Location>,
    origin: Location,
}

impl PathField {
    /// First cell to step onto along the cheapest path to `target`, or
    /// `None` if the target is the origin or was never reached.
    pub fn first_step(&self, target: Location) -> Option<Location> {
        if target == self.origin || !self.parents.contains_key(&target) {
            return None;
        }
        let mut step = target;
        while let Some(&prev) = self.parents.get(&step) {
            if prev == self.origin {
                return Some(step);
            }
            step = prev;
        }
        None
    }
}

/// Bounded Dijkstra from the unit's position.
///
/// First-step rules: stepping onto a blocking friendly unit is forbidden;
/// in games with more than 2 players, stepping next to an enemy costs a
/// large penalty (and onto an enemy-adjacent occupied cell is forbidden).
/// Own depot cells are never entered. Paths are pruned beyond
/// `SEARCH_RADIUS` steps and once their cost exceeds the unit's cargo,
/// since the unit could not afford to traverse them.
pub fn mining_search(g: &SearchGrid, unit: &Unit) -> PathField {
    let start = unit.pos;
    let cargo_scaled = unit.cargo as u64 * SCALE;
    let penalty_scaled = (FIRST_STEP_PENALTY * SCALE as f32) as u64;

    let mut cost = GridArray::new(g.dims, f32::INFINITY);
    cost.set(start, 0.0);

    let mut parents = FnvHashMap::default();
    let mut ranking: FnvHashMap<Location, u64> = FnvHashMap::default();
    let mut pure: FnvHashMap<Location, u64> = FnvHashMap::default();
    let mut steps: FnvHashMap<Location, u32> = FnvHashMap::default();
    ranking.insert(start, 0);
    pure.insert(start, 0);
    steps.insert(start, 0);

    let mut heap = BinaryHeap::new();
    heap.push(Reverse((0u64, start)));

    while let Some(Reverse((rank, current))) = heap.pop() {
        if ranking.get(&current).is_some_and(|&r| rank > r) {
            continue;
        }
        let step_count = steps[&current] + 1;
        if step_count > SEARCH_RADIUS {
            continue;
        }

        for neighbor in g.dims.neighbors4(current) {
            if g.depot_cells.contains(&neighbor) {
                continue;
            }

            let mut penalty = 0u64;
            if step_count == 1 {
                if g.blocking_friendly(neighbor) {
                    continue;
                }
                if g.num_players > 2 && g.flags.get(neighbor).contains(CellFlags::THREAT_ADJACENT)
                {
                    if g.enemy_occupied(neighbor) {
                        continue;
                    }
                    penalty = penalty_scaled;
                }
            }

            let edge = g.edge_cost(neighbor);
            let pure_next = pure[&current] + edge;
            if pure_next > cargo_scaled {
                continue;
            }

            let rank_next = rank + edge + penalty;
            if ranking.get(&neighbor).is_none_or(|&old| rank_next < old) {
                ranking.insert(neighbor, rank_next);
                pure.insert(neighbor, pure_next);
                steps.insert(neighbor, step_count);
                parents.insert(neighbor, current);
                cost.set(neighbor, pure_next as f32 / SCALE as f32);
                heap.push(Reverse((rank_next, neighbor)));
            }
        }
    }

    PathField {
        cost,
        parents,
        origin: start,
    }
}

/// Goal-directed best-first search to a depot (or depot construction
/// site). The guidance term pulls the frontier toward depot-dense regions;
/// the first-step enemy-adjacency penalty applies in all game sizes.
/// Returns the first cell to step onto, or `None` when the unit is already
/// at the goal or the frontier is exhausted.
pub fn depot_search(g: &SearchGrid, unit: &Unit, goal: Location) -> Option<Location> {
    let start = unit.pos;
    if start == goal {
        return None;
    }
    let penalty_scaled = (FIRST_STEP_PENALTY * SCALE as f32) as u64;
    let guide_rate = g.avg_resource * RETURN_HEURISTIC_WEIGHT;

    let mut parents = FnvHashMap::default();
    let mut best_g: FnvHashMap<Location, u64> = FnvHashMap::default();
    let mut steps: FnvHashMap<Location, u32> = FnvHashMap::default();
    best_g.insert(start, 0);
    steps.insert(start, 0);

    let mut heap = BinaryHeap::new();
    heap.push(Reverse((0u64, start)));

    while let Some(Reverse((_, current))) = heap.pop() {
        if current == goal {
            let field = PathField {
                cost: GridArray::new(g.dims, 0.0),
                parents,
                origin: start,
            };
            return field.first_step(goal);
        }
        let step_count = steps[&current] + 1;

        for neighbor in g.dims.neighbors4(current) {
            let mut penalty = 0u64;
            if step_count == 1 && g.flags.get(neighbor).contains(CellFlags::THREAT_ADJACENT) {
                penalty = penalty_scaled;
            }

            let g_next = best_g[&current] + g.edge_cost(neighbor) + penalty;
            if best_g.get(&neighbor).is_none_or(|&old| g_next < old) {
                best_g.insert(neighbor, g_next);
                steps.insert(neighbor, step_count);
                parents.insert(neighbor, current);
                let guide =
                    (g.depot_distance.get(neighbor) * guide_rate * SCALE as f32) as u64;
                heap.push(Reverse((g_next + guide, neighbor)));
            }
        }
    }

    None
}

/// Deadline fallback: score only the 4 neighbors plus staying put, using
/// the coarse density field minus the move toll. Staying gets a bonus
/// unless the current cell is nearly exhausted. Never moves onto a
/// friendly unit that is mining, and never moves at all when cargo cannot
/// cover the toll.
pub fn fast_mining_step(g: &SearchGrid, unit: &Unit) -> Direction {
    let here = g.resource.get(unit.pos);
    let toll = here / g.move_cost_ratio as f32;
    if (unit.cargo as f32) < toll {
        return Direction::Still;
    }

    let dirs = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Still,
    ];
    let stay_factor = if here <= 1.0 { 0.0 } else { 1.3 };

    let mut best_dir = Direction::Still;
    let mut best_pref = f32::NEG_INFINITY;
    for dir in dirs {
        let dest = dir.apply(g.dims, unit.pos);
        let mut pref = if dir == Direction::Still { 0.0 } else { -toll };
        pref += g.density_coarse.get(dest);

        if dir != Direction::Still {
            let occupied_by_miner = g
                .occupancy
                .get(dest)
                .and_then(|id| g.units.get(&id))
                .is_some_and(|u| u.owner == g.my_id && u.role == Some(Role::Mining));
            if occupied_by_miner {
                pref = f32::NEG_INFINITY;
            }
        } else {
            pref *= stay_factor;
        }

        if pref > best_pref {
            best_pref = pref;
            best_dir = dir;
        }
    }

    best_dir
}
