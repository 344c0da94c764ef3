//! Turn scheduler.
//!
//! Drains the role queues in a fixed order (builders, miners, returners,
//! endgame) and emits at most one command per unit plus at most one spawn.
//! Every decision is committed to the occupancy grid as soon as it is made,
//! so each unit plans against the board as it will actually be.
//!
//! The whole turn runs against a wall-clock budget of roughly two seconds.
//! As the deadline nears, mining first degrades to the 1-step greedy
//! fallback, then whole queues are abandoned; units left uncommanded simply
//! hold still.

use crate::constants::*;
use crate::grid::CellFlags;
use crate::location::Location;
use crate::model::*;
use crate::scoring::cell_scores;
use crate::search::{depot_search, fast_mining_step, mining_search};
use crate::sites;
use crate::state::TurnState;
use log::*;
use std::time::{Duration, Instant};

/// Wall-clock thresholds within the turn, measured from snapshot receipt.
pub struct TurnBudget {
    start: Instant,
}

impl TurnBudget {
    pub fn starting_now() -> Self {
        TurnBudget {
            start: Instant::now(),
        }
    }

    /// Test hook: a budget that started at an arbitrary instant.
    pub fn with_start(start: Instant) -> Self {
        TurnBudget { start }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn over(&self, ms: u64) -> bool {
        self.elapsed() >= Duration::from_millis(ms)
    }

    /// Past this point mining plans with the greedy fallback only.
    pub fn degrade_mining(&self) -> bool {
        self.over(1820)
    }

    /// Past this point the mining queue is abandoned.
    pub fn abort_mining(&self) -> bool {
        self.over(1870)
    }

    /// Past this point the returning queue is abandoned.
    pub fn abort_returning(&self) -> bool {
        self.over(1920)
    }

    /// Spawning is only worth the bytes if there is time to send it.
    pub fn can_spawn(&self) -> bool {
        !self.over(1700)
    }

    /// Whether a mid-turn cost-field recomputation still fits.
    pub fn can_recompute(&self) -> bool {
        !self.over(1500)
    }
}

/// Plan and emit this turn's commands.
pub fn run_turn(st: &mut TurnState, budget: &TurnBudget) -> Vec<Command> {
    sites::evaluate(st, budget);
    st.classify(budget);

    let mut commands = Vec::with_capacity(st.my_count + 1);
    let builders_active = !st.queues.building.is_empty();

    while let Some(entry) = st.queues.building.pop() {
        commands.push(builder_command(st, entry.unit));
    }

    let mining_count = st.queues.mining.len();
    let mining_start = budget.elapsed();
    while let Some(entry) = st.queues.mining.pop() {
        if budget.abort_mining() {
            warn!("out of time, abandoning {} miners", st.queues.mining.len() + 1);
            break;
        }
        let cargo = st.units[&entry.unit].cargo;
        let degraded =
            budget.degrade_mining() || (st.turn > LATE_GAME_TURN && cargo < LATE_GAME_CARGO);
        commands.push(mining_command(st, entry.unit, degraded));
    }
    debug!(
        "mining: {} units in {:?}",
        mining_count,
        budget.elapsed() - mining_start
    );

    while let Some(entry) = st.queues.returning.pop() {
        if budget.abort_returning() {
            warn!(
                "out of time, abandoning {} returners",
                st.queues.returning.len() + 1
            );
            break;
        }
        commands.push(returning_command(st, entry.unit));
    }

    while let Some(entry) = st.queues.endgame.pop() {
        commands.push(endgame_command(st, entry.unit));
    }

    if let Some(spawn) = spawn_command(st, budget, builders_active) {
        commands.push(spawn);
    }
    commands
}

fn nearest_depot(st: &TurnState, pos: Location) -> Location {
    st.depots
        .iter()
        .copied()
        .min_by_key(|&d| st.dims.distance(pos, d))
        .unwrap_or(st.ctx.home)
}

/// Pick the best unclaimed cell for a miner and the first step toward it.
/// A claim is recorded even when the unit stays put.
fn select_mining_target(st: &mut TurnState, unit: &Unit) -> (Location, Direction) {
    st.ensure_fields(&[unit.id]);
    let field = mining_search(&st.search_grid(), unit);
    let mut scores = {
        let p = st.score_params();
        cell_scores(&p, &st.unit_fields[&unit.id], &field.cost)
    };
    for loc in st.dims.locations() {
        if st.targeted.get(loc).is_some() {
            scores.set(loc, 0.0);
        }
    }
    for &depot in &st.my_depot_cells {
        scores.set(depot, 0.0);
    }

    let (best_loc, best) = scores.argmax();
    if best <= 0.0 {
        st.targeted.set(unit.pos, Some(unit.id));
        return (unit.pos, Direction::Still);
    }
    st.targeted.set(best_loc, Some(unit.id));
    let dir = field
        .first_step(best_loc)
        .map(|step| direction_between(st.dims, unit.pos, step))
        .unwrap_or(Direction::Still);
    (best_loc, dir)
}

fn mining_command(st: &mut TurnState, id: UnitId, degraded: bool) -> Command {
    let unit = st.units[&id];
    let (target, dir) = if degraded {
        let dir = fast_mining_step(&st.search_grid(), &unit);
        (dir.apply(st.dims, unit.pos), dir)
    } else {
        select_mining_target(st, &unit)
    };

    if target == unit.pos {
        st.commit_move(id, unit.pos);
        return Command::Move {
            unit: id,
            dir: Direction::Still,
        };
    }
    if !st.search_grid().can_pay_toll(&unit) {
        st.commit_move(id, unit.pos);
        return Command::Move {
            unit: id,
            dir: Direction::Still,
        };
    }

    let dest = dir.apply(st.dims, unit.pos);
    let mut final_dir = dir;

    // A returning unit in the way may simply trade places, if the miner is
    // the one nearer the depot.
    if let Some(oid) = st.occupancy.get(dest) {
        let other = st.units[&oid];
        if other.owner == st.ctx.my_id
            && other.role == Some(Role::Returning)
            && other.next.is_none()
        {
            let d_self = st.cost_field.distance.get(unit.pos);
            let d_other = st.cost_field.distance.get(other.pos);
            if d_self < d_other {
                st.commit_swap(id, oid);
                return Command::Move { unit: id, dir };
            }
            final_dir = Direction::Still;
        }
    }

    // Head-to-head with 2 players: step into a threatened cell only when
    // losing the trade favors us and our units crowd that cell.
    if st.ctx.num_players == 2 && st.flags.get(dest).contains(CellFlags::THREAT) {
        if let Some(eid) = st.threat_unit.get(dest) {
            let enemy = st.units[&eid];
            let favorable = unit.cargo < enemy.cargo
                && st.own_proximity.get(dest) > st.enemy_proximity.get(dest);
            final_dir = if favorable { dir } else { Direction::Still };
        }
    }

    let final_dest = final_dir.apply(st.dims, unit.pos);
    st.commit_move(id, final_dest);
    Command::Move {
        unit: id,
        dir: final_dir,
    }
}

fn returning_command(st: &mut TurnState, id: UnitId) -> Command {
    let unit = st.units[&id];

    // A swap earlier this turn already fixed this unit's move.
    if let Some(next) = unit.next {
        let dir = direction_between(st.dims, unit.pos, next);
        return Command::Move { unit: id, dir };
    }

    let goal = nearest_depot(st, unit.pos);
    let step = depot_search(&st.search_grid(), &unit, goal);
    let dir = match step {
        Some(cell) => {
            let friendly_block = st
                .occupancy
                .get(cell)
                .and_then(|oid| st.units.get(&oid))
                .is_some_and(|o| o.owner == st.ctx.my_id);
            if friendly_block {
                Direction::Still
            } else {
                direction_between(st.dims, unit.pos, cell)
            }
        }
        None => Direction::Still,
    };
    st.commit_move(id, dir.apply(st.dims, unit.pos));
    Command::Move { unit: id, dir }
}

fn builder_command(st: &mut TurnState, id: UnitId) -> Command {
    let unit = st.units[&id];
    let Some(site) = unit.site else {
        st.commit_move(id, unit.pos);
        return Command::Move {
            unit: id,
            dir: Direction::Still,
        };
    };

    if unit.pos == site {
        // The conversion absorbs the unit's cargo and the cell's resource.
        let funds = st.bank() + unit.cargo as u64 + st.resource.get(site) as u64;
        if funds >= st.ctx.constants.depot_cost as u64 {
            info!("constructing depot at ({}, {})", site.x(), site.y());
            st.ctx.clear_ghosts();
            return Command::Construct { unit: id };
        }
        st.commit_move(id, unit.pos);
        return Command::Move {
            unit: id,
            dir: Direction::Still,
        };
    }

    let dir = depot_search(&st.search_grid(), &unit, site)
        .map(|cell| direction_between(st.dims, unit.pos, cell))
        .unwrap_or(Direction::Still);
    st.commit_move(id, dir.apply(st.dims, unit.pos));
    Command::Move { unit: id, dir }
}

/// Endgame units beeline home; piling up on the depot is fine by then.
fn endgame_command(st: &mut TurnState, id: UnitId) -> Command {
    let unit = st.units[&id];
    let goal = nearest_depot(st, unit.pos);
    let dir = naive_step_toward(st.dims, unit.pos, goal);
    st.commit_move(id, dir.apply(st.dims, unit.pos));
    Command::Move { unit: id, dir }
}

fn spawn_command(st: &TurnState, budget: &TurnBudget, builders_active: bool) -> Option<Command> {
    if builders_active {
        return None;
    }
    let max_turns = st.ctx.constants.max_turns;
    let wanted = if st.ctx.num_players == 2 {
        // Keep pace with the larger enemy fleet, more cautiously late on.
        (st.enemy_max_count + 1 > st.my_count && st.turn <= max_turns.saturating_sub(200))
            || (st.enemy_max_count > st.my_count && st.turn <= max_turns.saturating_sub(100))
    } else {
        st.total_resource / st.ships_total.max(1) as f64 > 900.0
    };
    if !wanted {
        return None;
    }
    if st.bank() < st.ctx.constants.spawn_cost as u64 {
        return None;
    }
    if st.occupancy.get(st.ctx.home).is_some() {
        return None;
    }
    if !budget.can_spawn() {
        return None;
    }
    Some(Command::Spawn)
}
