//! Cross-turn state, built once at startup and passed by reference into
//! every turn's computation.

use crate::constants::*;
use crate::grid::*;
use crate::location::Location;
use crate::model::*;
use fnv::FnvHashMap;
use log::*;

/// Everything the engine decides before turn 1 plus the small amount of
/// state that must survive between turns: depot-site candidates, ghost
/// depots with their assigned builder, remembered unit roles, and enemy
/// previous positions for next-cell prediction.
pub struct PersistentContext {
    pub dims: GridDims,
    pub num_players: usize,
    pub my_id: PlayerId,
    /// The home depot every game starts with.
    pub home: Location,
    pub constants: GameConstants,
    /// Number of turns ahead the scoring model projects.
    pub horizon: usize,
    /// Weight of the local-concentration bonus in cell scoring. Clustering
    /// pays off more on large maps and in 4-player games.
    pub concentration_factor: f32,
    /// Map-size cap on how many depots we will ever build.
    pub max_depots: usize,
    /// Remaining candidate depot sites; committed sites are removed.
    pub candidate_sites: Vec<Location>,
    /// Provisional depots whose construction is committed but not finished.
    pub ghost_depots: Vec<Depot>,
    /// The unit committed to building, with its target site.
    pub builder: Option<(UnitId, Location)>,
    /// Total resource on the map at game start.
    pub initial_resource: f64,
    /// Role each of our units held at the end of the previous turn.
    pub roles: FnvHashMap<UnitId, Role>,
    /// Previous position of each enemy unit, for predicting its next cell.
    pub enemy_prev: FnvHashMap<UnitId, Location>,
}

impl PersistentContext {
    pub fn new(
        dims: GridDims,
        num_players: usize,
        my_id: PlayerId,
        home: Location,
        constants: GameConstants,
        initial_resources: &GridArray<f32>,
    ) -> Self {
        let h = dims.height as f32;
        let size_term = 0.4 * (h / 32.0 - 1.0);
        let concentration_factor = if num_players == 2 {
            (size_term + 0.1).max(0.0)
        } else {
            (size_term + 0.5).max(0.0)
        };

        let max_depots = ((dims.width.saturating_sub(24)) / 8).min(4);

        let w = dims.width as u32;
        let gh = dims.height as u32;
        let candidate_sites = if num_players == 2 {
            vec![
                Location::new(0, gh / 4),
                Location::new(0, 3 * gh / 4),
                Location::new(w / 2, gh / 4),
                Location::new(w / 2, 3 * gh / 4),
            ]
        } else {
            vec![
                Location::new(0, 0),
                Location::new(0, gh / 2),
                Location::new(w / 2, gh / 2),
                Location::new(w / 2, 0),
            ]
        };

        let initial_resource = initial_resources.total();
        info!(
            "context: {}x{} map, {} players, concentration {:.3}, max depots {}",
            dims.width, dims.height, num_players, concentration_factor, max_depots
        );

        PersistentContext {
            dims,
            num_players,
            my_id,
            home,
            constants,
            horizon: SCORE_HORIZON,
            concentration_factor,
            max_depots,
            candidate_sites,
            ghost_depots: Vec::new(),
            builder: None,
            initial_resource,
            roles: FnvHashMap::default(),
            enemy_prev: FnvHashMap::default(),
        }
    }

    /// Register a committed depot build: remember the builder, remove the
    /// site from the candidate pool and add a ghost depot in its place.
    pub fn commit_build(&mut self, unit: UnitId, site: Location) {
        self.candidate_sites.retain(|&c| c != site);
        self.ghost_depots.push(Depot {
            owner: self.my_id,
            pos: site,
            provisional: true,
        });
        self.builder = Some((unit, site));
    }

    /// Drop all provisional depots and the builder assignment. Called when
    /// the build completes or the builder dies.
    pub fn clear_ghosts(&mut self) {
        self.ghost_depots.clear();
        self.builder = None;
    }
}
