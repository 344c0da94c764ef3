//! Grid-wide travel cost to the nearest depot.
//!
//! The map is first partitioned into depot catchments by pure wrapped
//! distance; each depot then runs Dijkstra outward, relaxing only cells
//! inside its own catchment so that travel-cost fronts never mix across
//! catchment boundaries. The resulting field is the routing-efficiency
//! penalty used by the cell-scoring model. Recomputed whenever the depot
//! set changes, which in practice means once per turn.

use crate::grid::*;
use crate::location::Location;
use pathfinding::directed::dijkstra::dijkstra_all;

/// Fixed-point scale for travel costs, so Dijkstra can order them as
/// integers. Resource amounts are integral, so `amount * SCALE / ratio` is
/// exact for the standard ratio.
pub const COST_SCALE: u32 = 1000;

#[derive(Clone, Debug)]
pub struct CostField {
    /// Travel cost from each cell to its nearest depot.
    pub travel_cost: GridArray<f32>,
    /// Wrapped taxicab distance from each cell to its nearest depot.
    pub distance: GridArray<f32>,
    /// Index into the depot list of each cell's nearest depot.
    pub catchment: GridArray<u16>,
}

impl CostField {
    /// Compute the field for the given depot set. `depots` must be
    /// non-empty; ties in the distance partition go to the lowest index.
    pub fn compute(
        dims: GridDims,
        resources: &GridArray<f32>,
        depots: &[Location],
        move_cost_ratio: u32,
    ) -> CostField {
        debug_assert!(!depots.is_empty());

        let mut distance = GridArray::new(dims, 0.0f32);
        let mut catchment = GridArray::new(dims, 0u16);
        for loc in dims.locations() {
            let mut best = u32::MAX;
            let mut best_index = 0u16;
            for (i, &d) in depots.iter().enumerate() {
                let dist = dims.distance(loc, d);
                if dist < best {
                    best = dist;
                    best_index = i as u16;
                }
            }
            distance.set(loc, best as f32);
            catchment.set(loc, best_index);
        }

        let edge_cost = |loc: Location| -> u32 {
            (resources.get(loc).max(0.0) * COST_SCALE as f32) as u32 / move_cost_ratio
        };

        let mut travel_cost = GridArray::new(dims, f32::INFINITY);
        for (i, &depot) in depots.iter().enumerate() {
            travel_cost.set(depot, 0.0);
            let reached = dijkstra_all(&depot, |&loc: &Location| {
                dims.neighbors4(loc)
                    .into_iter()
                    .filter(|&n| catchment.get(n) == i as u16)
                    .map(|n| (n, edge_cost(n)))
                    .collect::<Vec<_>>()
            });
            for (loc, (_, cost)) in reached {
                if catchment.get(loc) == i as u16 {
                    travel_cost.set(loc, cost as f32 / COST_SCALE as f32);
                }
            }
        }

        // Cells a catchment-restricted front cannot reach (possible on rare
        // wraparound tie patterns) fall back to a distance-based estimate.
        let avg = resources.mean();
        for loc in dims.locations() {
            if travel_cost.get(loc).is_infinite() {
                let estimate = distance.get(loc) * avg / move_cost_ratio as f32;
                travel_cost.set(loc, estimate);
            }
        }

        CostField {
            travel_cost,
            distance,
            catchment,
        }
    }
}
