//! Core data model: units, depots, roles, directions and commands.
//!
//! Units and per-cell markers are stored arena-style: the turn state owns
//! flat maps/arrays and cells refer back to units by `UnitId` only, never
//! by shared object references.

use crate::grid::GridDims;
use crate::location::Location;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u32);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a unit is doing this turn. Re-evaluated by the classifier once per
/// unit per turn; `DepotBuilding` carries across turns via the persistent
/// context until the build resolves.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Role {
    Mining,
    Returning,
    EndgameReturning,
    DepotBuilding,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Direction {
    North,
    South,
    East,
    West,
    Still,
}

impl Direction {
    pub const CARDINALS: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// Offset as (dx, dy); north decreases the row index.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::South => (0, 1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
            Direction::Still => (0, 0),
        }
    }

    pub fn apply(self, dims: GridDims, loc: Location) -> Location {
        let (dx, dy) = self.offset();
        dims.step(loc, dx, dy)
    }

    pub fn wire_char(self) -> char {
        match self {
            Direction::North => 'n',
            Direction::South => 's',
            Direction::East => 'e',
            Direction::West => 'w',
            Direction::Still => 'o',
        }
    }
}

/// Direction of a single wrapped step from `from` to an adjacent `to`.
/// Returns `Still` when the cells coincide or are not adjacent.
pub fn direction_between(dims: GridDims, from: Location, to: Location) -> Direction {
    for dir in Direction::CARDINALS {
        if dir.apply(dims, from) == to {
            return dir;
        }
    }
    Direction::Still
}

/// A collision-blind single step toward a target, taking the wrapped axis
/// deltas and preferring horizontal movement. Used for endgame homing where
/// stacking on the depot is acceptable.
pub fn naive_step_toward(dims: GridDims, from: Location, to: Location) -> Direction {
    if from == to {
        return Direction::Still;
    }
    let w = dims.width as i32;
    let h = dims.height as i32;
    let dx = to.x() as i32 - from.x() as i32;
    let dy = to.y() as i32 - from.y() as i32;

    if dx != 0 {
        let wrapped = dx.rem_euclid(w);
        return if wrapped <= w - wrapped {
            Direction::East
        } else {
            Direction::West
        };
    }
    if dy != 0 {
        let wrapped = dy.rem_euclid(h);
        return if wrapped <= h - wrapped {
            Direction::South
        } else {
            Direction::North
        };
    }
    Direction::Still
}

/// A single unit as seen this turn. Small and `Copy`; the authoritative
/// store is the turn state's registry, keyed by id.
#[derive(Copy, Clone, Debug)]
pub struct Unit {
    pub id: UnitId,
    pub owner: PlayerId,
    pub pos: Location,
    pub cargo: u32,
    pub role: Option<Role>,
    /// Committed next position, set once a move is decided and consumed by
    /// later planning passes in the same turn.
    pub next: Option<Location>,
    /// Construction site, for `DepotBuilding` units.
    pub site: Option<Location>,
}

/// A confirmed or provisional depot. Provisional ("ghost") depots take part
/// in distance and cost computations but are discarded if their builder
/// dies before the conversion happens.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Depot {
    pub owner: PlayerId,
    pub pos: Location,
    pub provisional: bool,
}

/// One engine command. The scheduler emits at most one per owned unit plus
/// at most one spawn per turn.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Command {
    Move { unit: UnitId, dir: Direction },
    Construct { unit: UnitId },
    Spawn,
}

impl Command {
    pub fn to_wire(self) -> String {
        match self {
            Command::Move { unit, dir } => format!("m {} {}", unit, dir.wire_char()),
            Command::Construct { unit } => format!("c {}", unit),
            Command::Spawn => "g".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_apply_wraps() {
        let dims = GridDims::new(4, 4);
        let origin = Location::new(0, 0);
        assert_eq!(Direction::North.apply(dims, origin), Location::new(0, 3));
        assert_eq!(Direction::West.apply(dims, origin), Location::new(3, 0));
        assert_eq!(Direction::Still.apply(dims, origin), origin);
    }

    #[test]
    fn direction_between_adjacent_cells() {
        let dims = GridDims::new(8, 8);
        let from = Location::new(0, 0);
        assert_eq!(
            direction_between(dims, from, Location::new(7, 0)),
            Direction::West
        );
        assert_eq!(
            direction_between(dims, from, Location::new(0, 1)),
            Direction::South
        );
        assert_eq!(direction_between(dims, from, from), Direction::Still);
    }

    #[test]
    fn naive_step_prefers_short_wrap() {
        let dims = GridDims::new(8, 8);
        // Wrapping west is 2 steps, going east is 6.
        assert_eq!(
            naive_step_toward(dims, Location::new(1, 3), Location::new(7, 3)),
            Direction::West
        );
        // Horizontal axis resolved before vertical.
        assert_eq!(
            naive_step_toward(dims, Location::new(1, 1), Location::new(2, 5)),
            Direction::East
        );
        assert_eq!(
            naive_step_toward(dims, Location::new(2, 2), Location::new(2, 2)),
            Direction::Still
        );
    }

    #[test]
    fn command_wire_format() {
        assert_eq!(
            Command::Move {
                unit: UnitId(12),
                dir: Direction::North
            }
            .to_wire(),
            "m 12 n"
        );
        assert_eq!(Command::Construct { unit: UnitId(3) }.to_wire(), "c 3");
        assert_eq!(Command::Spawn.to_wire(), "g");
    }
}
