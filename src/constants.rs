//! Game rule constants.
//!
//! The engine sends its rule set as a JSON dictionary during the handshake;
//! anything it omits falls back to the standard rule values. Field names
//! use our own vocabulary, with aliases matching the engine's keys.

use serde::{Deserialize, Serialize};

/// Rule constants supplied by the game engine at startup.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConstants {
    /// Maximum resource a unit can carry.
    #[serde(alias = "MAX_ENERGY")]
    pub max_cargo: u32,
    /// Banked resource consumed by spawning a new unit.
    #[serde(alias = "NEW_ENTITY_ENERGY_COST")]
    pub spawn_cost: u32,
    /// Banked resource consumed by converting a unit into a depot.
    #[serde(alias = "DROPOFF_COST")]
    pub depot_cost: u32,
    /// Moving off a cell costs `cell resource / move_cost_ratio`.
    #[serde(alias = "MOVE_COST_RATIO")]
    pub move_cost_ratio: u32,
    /// Mining a cell extracts `1 / extract_ratio` of its resource per turn.
    #[serde(alias = "EXTRACT_RATIO")]
    pub extract_ratio: u32,
    /// Total game length in turns.
    #[serde(alias = "MAX_TURNS")]
    pub max_turns: u32,
}

impl Default for GameConstants {
    fn default() -> Self {
        GameConstants {
            max_cargo: 1000,
            spawn_cost: 1000,
            depot_cost: 4000,
            move_cost_ratio: 10,
            extract_ratio: 4,
            max_turns: 400,
        }
    }
}

impl GameConstants {
    /// Per-turn decay base for projected mining: the fraction of a cell's
    /// resource left behind after one extraction.
    pub fn extract_base(&self) -> f32 {
        1.0 - 1.0 / self.extract_ratio as f32
    }
}

/// Number of turns ahead the cell-scoring model projects mining returns.
pub const SCORE_HORIZON: usize = 60;

/// Per-unit pathfinding gives up beyond this many steps from the unit.
pub const SEARCH_RADIUS: u32 = 32;

/// Soft penalty (in travel-cost units) for a first step into a cell
/// adjacent to an enemy unit. Large enough to forbid the step whenever any
/// alternative exists, without making it outright impassable.
pub const FIRST_STEP_PENALTY: f32 = 1000.0;

/// Weight of the depot-distance guidance term in the return-path search,
/// as a fraction of grid-average resource density.
pub const RETURN_HEURISTIC_WEIGHT: f32 = 0.1;

/// After this turn, low-cargo units always use the cheap 1-step mining
/// heuristic instead of the full search.
pub const LATE_GAME_TURN: u32 = 300;
pub const LATE_GAME_CARGO: u32 = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_json_overrides_defaults() {
        let parsed: GameConstants = serde_json::from_str(
            r#"{"MAX_ENERGY": 800, "MOVE_COST_RATIO": 5, "MAX_TURNS": 501, "UNKNOWN_KEY": 3}"#,
        )
        .unwrap();
        assert_eq!(parsed.max_cargo, 800);
        assert_eq!(parsed.move_cost_ratio, 5);
        assert_eq!(parsed.max_turns, 501);
        assert_eq!(parsed.depot_cost, 4000);
    }

    #[test]
    fn extract_base_matches_ratio() {
        let constants = GameConstants::default();
        assert!((constants.extract_base() - 0.75).abs() < f32::EPSILON);
    }
}
