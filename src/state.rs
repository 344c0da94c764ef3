//! Per-turn derived state and role classification.
//!
//! `TurnState` is rebuilt from the engine snapshot every turn: the resource
//! field and its smoothed variants, occupancy and hazard grids, the
//! depot cost field, and the four urgency-ordered role queues the scheduler
//! drains. Unit roles themselves persist across turns in the context and
//! are re-evaluated here once per unit per turn.

use crate::context::PersistentContext;
use crate::cost_field::CostField;
use crate::engine::TurnSnapshot;
use crate::grid::*;
use crate::location::Location;
use crate::model::*;
use crate::scheduler::TurnBudget;
use crate::scoring::{best_estimate, unit_fields, ScoreParams, UnitFields};
use crate::search::SearchGrid;
use fnv::FnvHashMap;
use itertools::Itertools;
use log::*;

/// Heap entry ordering units within a role queue. Lower keys drain first;
/// ties break toward the lower unit id so turn output is deterministic.
#[derive(Copy, Clone, Debug)]
pub struct QueueEntry {
    pub key: f32,
    pub unit: UnitId,
}

impl QueueEntry {
    /// Keys must order totally; anything non-finite collapses to the
    /// least-urgent sentinel.
    pub fn new(key: f32, unit: UnitId) -> Self {
        let key = if key.is_nan() { f32::MAX } else { key };
        QueueEntry { key, unit }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the max-heap pops the smallest key first.
        other
            .key
            .total_cmp(&self.key)
            .then_with(|| other.unit.cmp(&self.unit))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

type RoleQueue = std::collections::BinaryHeap<QueueEntry>;

/// One queue per role, drained in a fixed order by the scheduler.
#[derive(Default)]
pub struct RoleQueues {
    pub mining: RoleQueue,
    pub returning: RoleQueue,
    pub endgame: RoleQueue,
    pub building: RoleQueue,
}

pub struct TurnState<'a> {
    pub ctx: &'a mut PersistentContext,
    pub turn: u32,
    pub dims: GridDims,

    pub resource: GridArray<f32>,
    /// Tight Gaussian smoothing of the resource field.
    pub smoothed: GridArray<f32>,
    /// `smoothed` scaled into [0, 1] by its maximum.
    pub smoothed_norm: GridArray<f32>,
    /// Wide smoothing pass over `smoothed`, for the greedy fallback.
    pub density_coarse: GridArray<f32>,
    pub avg_resource: f32,
    pub total_resource: f64,

    pub units: FnvHashMap<UnitId, Unit>,
    /// Our unit ids in ascending order.
    pub my_units: Vec<UnitId>,
    pub banks: Vec<u64>,
    pub my_count: usize,
    pub enemy_max_count: usize,
    pub ships_total: usize,

    /// Depot positions the cost field was computed from: home first, then
    /// constructed depots, then ghosts.
    pub depots: Vec<Location>,
    /// Home plus constructed depots; cells units may deposit at.
    pub my_depot_cells: Vec<Location>,
    /// Constructed depots, home excluded.
    pub own_depot_count: usize,

    pub occupancy: GridArray<Option<UnitId>>,
    /// Mining targets claimed so far this turn.
    pub targeted: GridArray<Option<UnitId>>,
    /// Enemy unit occupying or predicted to enter each cell.
    pub threat_unit: GridArray<Option<UnitId>>,
    pub flags: GridArray<CellFlags>,
    pub own_proximity: GridArray<f32>,
    pub enemy_proximity: GridArray<f32>,

    pub cost_field: CostField,
    pub queues: RoleQueues,
    pub unit_fields: FnvHashMap<UnitId, UnitFields>,
}

fn add_diamond(grid: &mut GridArray<f32>, dims: GridDims, center: Location, radius: i32) {
    for dy in -radius..=radius {
        let xr = radius - dy.abs();
        for dx in -xr..=xr {
            *grid.get_mut(dims.step(center, dx, dy)) += 1.0;
        }
    }
}

impl<'a> TurnState<'a> {
    pub fn new(
        ctx: &'a mut PersistentContext,
        snapshot: &TurnSnapshot,
        resources: &GridArray<f32>,
    ) -> TurnState<'a> {
        let dims = ctx.dims;
        let resource = resources.clone();
        let avg_resource = resource.mean();
        let total_resource = resource.total();
        info!(
            "turn {}: resource remaining {:.3}",
            snapshot.turn,
            total_resource / ctx.initial_resource.max(1.0)
        );

        let smoothed = gaussian_smooth(&resource, 1.0);
        let peak = smoothed.max_value();
        let smoothed_norm = if peak > 0.0 {
            GridArray::fill_with(dims, |loc| smoothed.get(loc) / peak)
        } else {
            GridArray::new(dims, 0.0)
        };
        let density_coarse = gaussian_smooth(&smoothed, 3.0);

        let mut units = FnvHashMap::default();
        let mut occupancy = GridArray::new(dims, None);
        for &unit in &snapshot.units {
            occupancy.set(unit.pos, Some(unit.id));
            units.insert(unit.id, unit);
        }
        let my_units: Vec<UnitId> = units
            .values()
            .filter(|u| u.owner == ctx.my_id)
            .map(|u| u.id)
            .sorted()
            .collect();
        let my_count = my_units.len();
        let counts = units.values().counts_by(|u| u.owner);
        let enemy_max_count = counts
            .iter()
            .filter(|(&owner, _)| owner != ctx.my_id)
            .map(|(_, &n)| n)
            .max()
            .unwrap_or(0);
        let ships_total = units.len();
        debug!(
            "fleet: {} own, {} largest enemy, {} total",
            my_count, enemy_max_count, ships_total
        );

        let own_constructed: Vec<Location> = snapshot
            .depots
            .iter()
            .filter(|d| d.owner == ctx.my_id)
            .map(|d| d.pos)
            .sorted()
            .collect();
        let own_depot_count = own_constructed.len();
        let mut my_depot_cells = vec![ctx.home];
        my_depot_cells.extend(&own_constructed);
        let mut depots = my_depot_cells.clone();
        depots.extend(ctx.ghost_depots.iter().map(|g| g.pos));

        let cost_field =
            CostField::compute(dims, &resource, &depots, ctx.constants.move_cost_ratio);

        let mut own_proximity = GridArray::new(dims, 0.0f32);
        let mut enemy_proximity = GridArray::new(dims, 0.0f32);
        for unit in units.values() {
            if unit.owner == ctx.my_id {
                add_diamond(&mut own_proximity, dims, unit.pos, 4);
            } else {
                add_diamond(&mut enemy_proximity, dims, unit.pos, 4);
            }
        }

        // Hazard masks. Each enemy is assumed to continue in the direction
        // of its last observed move.
        let mut flags = GridArray::new(dims, CellFlags::NONE);
        let mut threat_unit = GridArray::new(dims, None);
        let mut enemy_prev = FnvHashMap::default();
        for unit in units.values().filter(|u| u.owner != ctx.my_id) {
            let predicted = match ctx.enemy_prev.get(&unit.id) {
                Some(&prev) if prev != unit.pos => {
                    let dir = direction_between(dims, prev, unit.pos);
                    dir.apply(dims, unit.pos)
                }
                _ => unit.pos,
            };
            for cell in [unit.pos, predicted] {
                *flags.get_mut(cell) |= CellFlags::THREAT;
                threat_unit.set(cell, Some(unit.id));
            }
            for dy in -1i32..=1 {
                let xr = 1 - dy.abs();
                for dx in -xr..=xr {
                    *flags.get_mut(dims.step(unit.pos, dx, dy)) |= CellFlags::THREAT_ADJACENT;
                }
            }
            enemy_prev.insert(unit.id, unit.pos);
        }
        ctx.enemy_prev = enemy_prev;

        TurnState {
            turn: snapshot.turn,
            dims,
            resource,
            smoothed,
            smoothed_norm,
            density_coarse,
            avg_resource,
            total_resource,
            units,
            my_units,
            banks: snapshot.banks.clone(),
            my_count,
            enemy_max_count,
            ships_total,
            depots,
            my_depot_cells,
            own_depot_count,
            occupancy,
            targeted: GridArray::new(dims, None),
            threat_unit,
            flags,
            own_proximity,
            enemy_proximity,
            cost_field,
            queues: RoleQueues::default(),
            unit_fields: FnvHashMap::default(),
            ctx,
        }
    }

    pub fn remaining_turns(&self) -> u32 {
        self.ctx.constants.max_turns.saturating_sub(self.turn)
    }

    pub fn bank(&self) -> u64 {
        self.banks
            .get(self.ctx.my_id.0 as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Scoring inputs borrowed from this turn's grids.
    pub fn score_params(&self) -> ScoreParams<'_> {
        ScoreParams {
            dims: self.dims,
            horizon: self.ctx.horizon,
            max_cargo: self.ctx.constants.max_cargo as f32,
            move_cost_ratio: self.ctx.constants.move_cost_ratio as f32,
            extract_base: self.ctx.constants.extract_base(),
            concentration: self.ctx.concentration_factor,
            num_players: self.ctx.num_players,
            avg_resource: self.avg_resource,
            resource: &self.resource,
            smoothed_norm: &self.smoothed_norm,
            depot_distance: &self.cost_field.distance,
            depot_cost: &self.cost_field.travel_cost,
            enemy_proximity: &self.enemy_proximity,
            flags: &self.flags,
        }
    }

    /// Pathfinding view of this turn's grids.
    pub fn search_grid(&self) -> SearchGrid<'_> {
        SearchGrid {
            dims: self.dims,
            num_players: self.ctx.num_players,
            move_cost_ratio: self.ctx.constants.move_cost_ratio,
            my_id: self.ctx.my_id,
            avg_resource: self.avg_resource,
            resource: &self.resource,
            occupancy: &self.occupancy,
            flags: &self.flags,
            units: &self.units,
            depot_cells: &self.my_depot_cells,
            depot_distance: &self.cost_field.distance,
            density_coarse: &self.density_coarse,
        }
    }

    /// Compute and cache the per-unit scoring grids for the given units.
    pub fn ensure_fields(&mut self, ids: &[UnitId]) {
        let missing: Vec<UnitId> = ids
            .iter()
            .copied()
            .filter(|id| !self.unit_fields.contains_key(id))
            .collect();
        if missing.is_empty() {
            return;
        }
        let mut computed = Vec::with_capacity(missing.len());
        {
            let p = self.score_params();
            for &id in &missing {
                let unit = &self.units[&id];
                computed.push((id, unit_fields(&p, unit.pos, unit.cargo)));
            }
        }
        self.unit_fields.extend(computed);
    }

    /// Record a decided move: occupancy follows the unit immediately so
    /// every later plan this turn sees the updated board.
    pub fn commit_move(&mut self, id: UnitId, dest: Location) {
        let Some(unit) = self.units.get_mut(&id) else {
            return;
        };
        let origin = unit.pos;
        unit.next = Some(dest);
        if dest != origin && self.occupancy.get(origin) == Some(id) {
            self.occupancy.set(origin, None);
        }
        self.occupancy.set(dest, Some(id));
    }

    /// Record a position swap between a mining unit and a returning unit.
    /// The returning unit's move is consumed later when its queue drains.
    pub fn commit_swap(&mut self, miner: UnitId, other: UnitId) {
        let miner_pos = self.units[&miner].pos;
        let other_pos = self.units[&other].pos;
        self.units.get_mut(&miner).unwrap().next = Some(other_pos);
        self.units.get_mut(&other).unwrap().next = Some(miner_pos);
        self.occupancy.set(other_pos, Some(miner));
        self.occupancy.set(miner_pos, Some(other));
    }

    /// Assign every unit its role for this turn and push it onto the
    /// matching urgency queue. Also resolves stale ghost depots once the
    /// builder they belonged to is gone.
    pub fn classify(&mut self, budget: &TurnBudget) {
        #[derive(Copy, Clone, PartialEq)]
        enum Slot {
            Mining,
            FreshReturning,
            Returning,
            Endgame,
            Building,
        }

        let remaining = self.remaining_turns() as f32;
        let margin = self.dims.width as f32 / 3.0;
        let full = self.ctx.constants.max_cargo as f32 * 0.95;
        let builder = self.ctx.builder;

        let mut slots: Vec<(UnitId, Slot)> = Vec::with_capacity(self.my_units.len());
        for &id in &self.my_units {
            let unit = self.units[&id];
            let slot = if self.cost_field.distance.get(unit.pos) > remaining - margin {
                Slot::Endgame
            } else if builder.is_some_and(|(b, _)| b == id) {
                Slot::Building
            } else {
                match self.ctx.roles.get(&id).copied() {
                    Some(Role::EndgameReturning) => Slot::Endgame,
                    Some(Role::Returning) if unit.cargo == 0 => Slot::Mining,
                    Some(Role::Returning) => Slot::Returning,
                    // Everyone else (miners, fresh units, ex-builders)
                    // mines until the 95% bar converts them.
                    _ if unit.cargo as f32 >= full => Slot::FreshReturning,
                    _ => Slot::Mining,
                }
            };
            slots.push((id, slot));
        }

        let mining_ids: Vec<UnitId> = slots
            .iter()
            .filter(|(_, s)| *s == Slot::Mining)
            .map(|(id, _)| *id)
            .collect();
        self.ensure_fields(&mining_ids);

        let mut estimates: FnvHashMap<UnitId, f32> = FnvHashMap::default();
        {
            let p = self.score_params();
            for &id in &mining_ids {
                estimates.insert(id, best_estimate(&p, &self.unit_fields[&id]));
            }
        }

        for (id, slot) in slots {
            let unit = self.units.get_mut(&id).unwrap();
            let dist = 1.0 + self.cost_field.distance.get(unit.pos);
            let (role, key) = match slot {
                Slot::Mining => {
                    let est = estimates[&id];
                    let key = if est > 0.0 { 1.0 / est } else { f32::MAX };
                    (Role::Mining, key)
                }
                Slot::FreshReturning => (Role::Returning, 1.0 / dist),
                Slot::Returning => (Role::Returning, dist),
                Slot::Endgame => (Role::EndgameReturning, dist),
                Slot::Building => {
                    unit.site = builder.map(|(_, site)| site);
                    (Role::DepotBuilding, 0.0)
                }
            };
            unit.role = Some(role);
            self.ctx.roles.insert(id, role);
            let entry = QueueEntry::new(key, id);
            match role {
                Role::Mining => self.queues.mining.push(entry),
                Role::Returning => self.queues.returning.push(entry),
                Role::EndgameReturning => self.queues.endgame.push(entry),
                Role::DepotBuilding => self.queues.building.push(entry),
            }
        }

        // A ghost depot with no live builder will never be constructed.
        if self.queues.building.is_empty() && !self.ctx.ghost_depots.is_empty() {
            warn!("builder lost, dropping ghost depots");
            self.ctx.clear_ghosts();
            if budget.can_recompute() {
                self.depots = self.my_depot_cells.clone();
                self.cost_field = CostField::compute(
                    self.dims,
                    &self.resource,
                    &self.depots,
                    self.ctx.constants.move_cost_ratio,
                );
            }
        }

        let live: Vec<UnitId> = self.my_units.clone();
        self.ctx.roles.retain(|id, _| live.binary_search(id).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TurnSnapshot;

    fn context(dims: GridDims, players: usize) -> PersistentContext {
        let resources = GridArray::new(dims, 100.0f32);
        PersistentContext::new(
            dims,
            players,
            PlayerId(0),
            Location::new(0, 0),
            crate::constants::GameConstants::default(),
            &resources,
        )
    }

    fn snap_unit(id: u32, owner: u8, pos: Location, cargo: u32) -> Unit {
        Unit {
            id: UnitId(id),
            owner: PlayerId(owner),
            pos,
            cargo,
            role: None,
            next: None,
            site: None,
        }
    }

    fn snapshot(turn: u32, units: Vec<Unit>) -> TurnSnapshot {
        TurnSnapshot {
            turn,
            banks: vec![5000, 5000],
            units,
            depots: Vec::new(),
        }
    }

    #[test]
    fn classifier_routes_roles_to_queues() {
        let dims = GridDims::new(8, 8);
        let mut ctx = context(dims, 2);
        ctx.roles.insert(UnitId(2), Role::Returning);
        ctx.roles.insert(UnitId(3), Role::Returning);
        let resources = GridArray::new(dims, 100.0f32);
        let snap = snapshot(
            50,
            vec![
                snap_unit(1, 0, Location::new(2, 2), 0),   // mining
                snap_unit(2, 0, Location::new(3, 3), 500), // keeps returning
                snap_unit(3, 0, Location::new(4, 4), 0),   // back to mining
                snap_unit(4, 0, Location::new(5, 5), 960), // hits the 95% bar
            ],
        );

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        st.classify(&TurnBudget::starting_now());

        assert_eq!(st.units[&UnitId(1)].role, Some(Role::Mining));
        assert_eq!(st.units[&UnitId(2)].role, Some(Role::Returning));
        assert_eq!(st.units[&UnitId(3)].role, Some(Role::Mining));
        assert_eq!(st.units[&UnitId(4)].role, Some(Role::Returning));
        assert_eq!(st.queues.mining.len(), 2);
        assert_eq!(st.queues.returning.len(), 2);
        assert!(st.queues.endgame.is_empty());
    }

    #[test]
    fn endgame_overrides_everything_else() {
        let dims = GridDims::new(8, 8);
        let mut ctx = context(dims, 2);
        let resources = GridArray::new(dims, 100.0f32);
        // 2 turns left; a unit 4 steps out cannot both mine and get home.
        let snap = snapshot(398, vec![snap_unit(1, 0, Location::new(4, 0), 10)]);

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        st.classify(&TurnBudget::starting_now());
        assert_eq!(st.units[&UnitId(1)].role, Some(Role::EndgameReturning));
        assert_eq!(st.queues.endgame.len(), 1);
    }

    #[test]
    fn hopeless_miner_gets_least_urgent_key() {
        let dims = GridDims::new(8, 8);
        let mut ctx = context(dims, 2);
        let resources = GridArray::new(dims, 0.0f32); // nothing to mine
        let snap = snapshot(50, vec![snap_unit(1, 0, Location::new(2, 2), 0)]);

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        st.classify(&TurnBudget::starting_now());
        let entry = st.queues.mining.pop().unwrap();
        assert_eq!(entry.key, f32::MAX);
        assert!(entry.key.is_finite());
    }

    #[test]
    fn queue_pops_smallest_key_with_id_tiebreak() {
        let mut heap: RoleQueue = Default::default();
        heap.push(QueueEntry::new(2.0, UnitId(1)));
        heap.push(QueueEntry::new(1.0, UnitId(9)));
        heap.push(QueueEntry::new(1.0, UnitId(4)));
        heap.push(QueueEntry::new(f32::NAN, UnitId(2)));

        assert_eq!(heap.pop().unwrap().unit, UnitId(4));
        assert_eq!(heap.pop().unwrap().unit, UnitId(9));
        assert_eq!(heap.pop().unwrap().unit, UnitId(1));
        // NaN collapsed to the sentinel, drained last.
        assert_eq!(heap.pop().unwrap().unit, UnitId(2));
    }

    #[test]
    fn classification_is_identical_across_rebuilds() {
        let dims = GridDims::new(8, 8);
        let resources = GridArray::new(dims, 100.0f32);
        let snap = snapshot(
            50,
            vec![
                snap_unit(1, 0, Location::new(2, 2), 0),
                snap_unit(2, 0, Location::new(3, 3), 500),
                snap_unit(3, 0, Location::new(5, 5), 960),
                snap_unit(9, 1, Location::new(6, 1), 40),
            ],
        );

        let drain = |heap: &mut RoleQueue| -> Vec<(f32, UnitId)> {
            std::iter::from_fn(|| heap.pop().map(|e| (e.key, e.unit))).collect()
        };

        let mut runs = Vec::new();
        for _ in 0..2 {
            let mut ctx = context(dims, 2);
            ctx.roles.insert(UnitId(2), Role::Returning);
            let mut st = TurnState::new(&mut ctx, &snap, &resources);
            st.classify(&TurnBudget::starting_now());
            let roles: Vec<(UnitId, Option<Role>)> = st
                .my_units
                .iter()
                .map(|id| (*id, st.units[id].role))
                .collect();
            runs.push((
                roles,
                drain(&mut st.queues.mining),
                drain(&mut st.queues.returning),
                drain(&mut st.queues.endgame),
            ));
        }

        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn enemy_moves_are_extrapolated_into_threat_cells() {
        let dims = GridDims::new(8, 8);
        let mut ctx = context(dims, 2);
        let resources = GridArray::new(dims, 100.0f32);
        // Enemy 7 was at (4, 4) last turn and is at (5, 4) now.
        ctx.enemy_prev.insert(UnitId(7), Location::new(4, 4));
        let snap = snapshot(50, vec![snap_unit(7, 1, Location::new(5, 4), 0)]);

        let st = TurnState::new(&mut ctx, &snap, &resources);
        assert!(st.flags.get(Location::new(5, 4)).contains(CellFlags::THREAT));
        assert!(st.flags.get(Location::new(6, 4)).contains(CellFlags::THREAT));
        assert_eq!(st.threat_unit.get(Location::new(6, 4)), Some(UnitId(7)));
        assert!(st
            .flags
            .get(Location::new(5, 3))
            .contains(CellFlags::THREAT_ADJACENT));
        assert_eq!(st.ctx.enemy_prev[&UnitId(7)], Location::new(5, 4));
    }

    #[test]
    fn ghosts_cleared_when_builder_is_gone() {
        let dims = GridDims::new(8, 8);
        let mut ctx = context(dims, 2);
        ctx.commit_build(UnitId(42), Location::new(4, 4));
        let resources = GridArray::new(dims, 100.0f32);
        // Unit 42 is not in the snapshot: the builder died.
        let snap = snapshot(100, vec![snap_unit(1, 0, Location::new(2, 2), 0)]);

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        assert_eq!(st.depots.len(), 2); // home + ghost
        st.classify(&TurnBudget::starting_now());
        assert!(st.ctx.ghost_depots.is_empty());
        assert!(st.ctx.builder.is_none());
        assert_eq!(st.depots.len(), 1);
    }

    #[test]
    fn swap_exchanges_occupancy_and_moves() {
        let dims = GridDims::new(8, 8);
        let mut ctx = context(dims, 2);
        let resources = GridArray::new(dims, 100.0f32);
        let a = Location::new(2, 2);
        let b = Location::new(3, 2);
        let snap = snapshot(50, vec![snap_unit(1, 0, a, 0), snap_unit(2, 0, b, 900)]);

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        st.commit_swap(UnitId(1), UnitId(2));
        assert_eq!(st.occupancy.get(a), Some(UnitId(2)));
        assert_eq!(st.occupancy.get(b), Some(UnitId(1)));
        assert_eq!(st.units[&UnitId(1)].next, Some(b));
        assert_eq!(st.units[&UnitId(2)].next, Some(a));
    }
}
