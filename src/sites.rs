//! Depot-site planning.
//!
//! Once per turn, before roles are assigned, the candidate sites are scored
//! by re-estimating every mining unit's prospects as if a depot already
//! stood there. A build is committed only when the best site beats the
//! fleet's current prospects by more than the depot cost amortized over the
//! remaining turns. Committing registers a ghost depot and reserves the
//! nearest unit as its builder.

use crate::cost_field::CostField;
use crate::grid::GridArray;
use crate::location::Location;
use crate::model::{Role, UnitId};
use crate::scheduler::TurnBudget;
use crate::scoring::{best_estimate, site_estimate};
use crate::state::TurnState;
use log::*;

/// Earliest turn at which a depot build will be considered.
const BUILD_EARLIEST_TURN: u32 = 70;
/// No builds are started within this many turns of the end.
const BUILD_LATEST_MARGIN: u32 = 200;
/// Minimum fleet size before a depot pays for itself.
const BUILD_MIN_FLEET: usize = 15;

pub fn evaluate(st: &mut TurnState, budget: &TurnBudget) {
    if st.ctx.builder.is_some() || !st.ctx.ghost_depots.is_empty() {
        return;
    }
    if st.own_depot_count >= st.ctx.max_depots {
        return;
    }
    let max_turns = st.ctx.constants.max_turns;
    if st.turn < BUILD_EARLIEST_TURN || st.turn > max_turns.saturating_sub(BUILD_LATEST_MARGIN) {
        return;
    }
    if st.my_count < BUILD_MIN_FLEET || st.ctx.candidate_sites.is_empty() {
        return;
    }

    // Units that mined last turn; roles for this turn are not assigned yet.
    let miners: Vec<UnitId> = st
        .my_units
        .iter()
        .copied()
        .filter(|id| st.ctx.roles.get(id) == Some(&Role::Mining))
        .collect();
    if miners.is_empty() {
        return;
    }
    st.ensure_fields(&miners);

    let (best_site, best_score, baseline) = {
        let p = st.score_params();
        let mut best: Option<(Location, f32)> = None;
        for &site in &st.ctx.candidate_sites {
            let site_dist =
                GridArray::fill_with(st.dims, |loc| st.dims.distance(site, loc) as f32);
            let score: f32 = miners
                .iter()
                .map(|id| site_estimate(&p, &st.unit_fields[id], &site_dist))
                .sum();
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((site, score));
            }
        }
        let baseline: f32 = miners
            .iter()
            .map(|id| best_estimate(&p, &st.unit_fields[id]))
            .sum();
        let (site, score) = best.unwrap();
        (site, score, baseline)
    };

    let remaining = max_turns - st.turn;
    let amortized = 2.0 * st.ctx.constants.depot_cost as f32 / (remaining + 1) as f32;
    if best_score - amortized <= baseline {
        return;
    }

    let builder = st
        .my_units
        .iter()
        .copied()
        .min_by_key(|&id| (st.dims.distance(st.units[&id].pos, best_site), id))
        .unwrap();
    info!(
        "committing depot at ({}, {}): site {:.1} vs fleet {:.1}, builder {}",
        best_site.x(),
        best_site.y(),
        best_score,
        baseline,
        builder
    );
    st.ctx.commit_build(builder, best_site);

    if budget.can_recompute() {
        st.depots.push(best_site);
        st.cost_field = CostField::compute(
            st.dims,
            &st.resource,
            &st.depots,
            st.ctx.constants.move_cost_ratio,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::GameConstants;
    use crate::context::PersistentContext;
    use crate::engine::TurnSnapshot;
    use crate::grid::GridDims;
    use crate::model::{PlayerId, Unit};

    fn context(dims: GridDims) -> PersistentContext {
        let resources = GridArray::new(dims, 300.0f32);
        PersistentContext::new(
            dims,
            2,
            PlayerId(0),
            Location::new(0, 0),
            GameConstants::default(),
            &resources,
        )
    }

    fn fleet(pos: Location, n: u32) -> Vec<Unit> {
        (1..=n)
            .map(|id| Unit {
                id: UnitId(id),
                owner: PlayerId(0),
                pos,
                cargo: 0,
                role: None,
                next: None,
                site: None,
            })
            .collect()
    }

    fn snapshot(turn: u32, units: Vec<Unit>) -> TurnSnapshot {
        TurnSnapshot {
            turn,
            banks: vec![8000, 8000],
            units,
            depots: Vec::new(),
        }
    }

    // On a uniform 300-resource map, a fleet parked 16 steps from home can
    // bank nothing (every round trip costs more than a cell holds), so a
    // depot on top of it clears the amortization bar easily.
    #[test]
    fn commits_when_a_site_beats_the_fleet_baseline() {
        let dims = GridDims::new(32, 32);
        let mut ctx = context(dims);
        let site = Location::new(8, 8);
        ctx.candidate_sites = vec![site];
        for id in 1..=15u32 {
            ctx.roles.insert(UnitId(id), Role::Mining);
        }
        let resources = GridArray::new(dims, 300.0f32);
        let snap = snapshot(100, fleet(site, 15));

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        evaluate(&mut st, &TurnBudget::starting_now());

        assert_eq!(st.ctx.builder.map(|(_, s)| s), Some(site));
        assert_eq!(st.ctx.builder.map(|(b, _)| b), Some(UnitId(1)));
        assert!(st.ctx.candidate_sites.is_empty());
        assert_eq!(st.ctx.ghost_depots.len(), 1);
        // The committed ghost joins the depot set straight away.
        assert!(st.depots.contains(&site));
    }

    #[test]
    fn stands_pat_when_no_site_improves_on_the_baseline() {
        let dims = GridDims::new(32, 32);
        let mut ctx = context(dims);
        ctx.candidate_sites = vec![Location::new(16, 8)];
        for id in 1..=15u32 {
            ctx.roles.insert(UnitId(id), Role::Mining);
        }
        let resources = GridArray::new(dims, 300.0f32);
        // Fleet sits at home; a distant depot changes nothing for it.
        let snap = snapshot(100, fleet(Location::new(0, 0), 15));

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        evaluate(&mut st, &TurnBudget::starting_now());

        assert!(st.ctx.builder.is_none());
        assert_eq!(st.ctx.candidate_sites.len(), 1);
        assert!(st.ctx.ghost_depots.is_empty());
    }

    #[test]
    fn gates_hold_outside_the_build_window() {
        let dims = GridDims::new(32, 32);
        let mut ctx = context(dims);
        let site = Location::new(8, 8);
        ctx.candidate_sites = vec![site];
        for id in 1..=15u32 {
            ctx.roles.insert(UnitId(id), Role::Mining);
        }
        let resources = GridArray::new(dims, 300.0f32);

        for turn in [50, 350] {
            let snap = snapshot(turn, fleet(site, 15));
            let mut st = TurnState::new(&mut ctx, &snap, &resources);
            evaluate(&mut st, &TurnBudget::starting_now());
            assert!(st.ctx.builder.is_none(), "turn {turn}");
        }
    }

    #[test]
    fn small_fleets_never_build() {
        let dims = GridDims::new(32, 32);
        let mut ctx = context(dims);
        let site = Location::new(8, 8);
        ctx.candidate_sites = vec![site];
        for id in 1..=10u32 {
            ctx.roles.insert(UnitId(id), Role::Mining);
        }
        let resources = GridArray::new(dims, 300.0f32);
        let snap = snapshot(100, fleet(site, 10));

        let mut st = TurnState::new(&mut ctx, &snap, &resources);
        evaluate(&mut st, &TurnBudget::starting_now());
        assert!(st.ctx.builder.is_none());
    }
}
