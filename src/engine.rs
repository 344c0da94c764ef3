//! Text protocol to the game engine.
//!
//! The handshake carries a JSON rule dictionary, the player roster with
//! home depots, and the full resource grid. After that each turn is a
//! block of per-player unit and depot listings followed by resource-cell
//! diffs; the engine keeps the authoritative grid, we mirror it by
//! applying the diffs. Commands go back as one space-separated line.

use crate::constants::GameConstants;
use crate::grid::{GridArray, GridDims};
use crate::location::Location;
use crate::model::*;
use itertools::Itertools;
use std::io::{BufRead, Write};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("engine i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad rule constants: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed engine line: {0:?}")]
    Malformed(String),
    #[error("engine closed the stream")]
    UnexpectedEof,
}

/// Everything the engine reports for one turn. Roles and plans are ours to
/// fill in; units arrive bare.
#[derive(Debug, Clone)]
pub struct TurnSnapshot {
    pub turn: u32,
    /// Banked resource per player, indexed by player id.
    pub banks: Vec<u64>,
    pub units: Vec<Unit>,
    /// Constructed depots; home depots are not repeated here.
    pub depots: Vec<Depot>,
}

pub struct Engine<R, W> {
    reader: R,
    writer: W,
    pub constants: GameConstants,
    pub num_players: usize,
    pub my_id: PlayerId,
    /// Home depot of each player, indexed by player id.
    pub homes: Vec<Location>,
    pub dims: GridDims,
    resources: GridArray<f32>,
}

fn parse_field<T: FromStr>(token: Option<&str>, line: &str) -> Result<T, ProtocolError> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| ProtocolError::Malformed(line.to_string()))
}

impl<R: BufRead, W: Write> Engine<R, W> {
    /// Run the startup handshake: rule constants, roster, resource grid.
    pub fn init(mut reader: R, writer: W) -> Result<Self, ProtocolError> {
        let constants: GameConstants = serde_json::from_str(&read_line(&mut reader)?)?;

        let roster = read_line(&mut reader)?;
        let mut fields = roster.split_whitespace();
        let num_players: usize = parse_field(fields.next(), &roster)?;
        let my_id = PlayerId(parse_field(fields.next(), &roster)?);

        let mut homes = vec![Location::new(0, 0); num_players];
        for _ in 0..num_players {
            let line = read_line(&mut reader)?;
            let mut fields = line.split_whitespace();
            let id: usize = parse_field(fields.next(), &line)?;
            let x: u32 = parse_field(fields.next(), &line)?;
            let y: u32 = parse_field(fields.next(), &line)?;
            if id >= num_players {
                return Err(ProtocolError::Malformed(line));
            }
            homes[id] = Location::new(x, y);
        }

        let size = read_line(&mut reader)?;
        let mut fields = size.split_whitespace();
        let width: usize = parse_field(fields.next(), &size)?;
        let height: usize = parse_field(fields.next(), &size)?;
        let dims = GridDims::new(width, height);

        let mut resources = GridArray::new(dims, 0.0f32);
        for y in 0..height {
            let row = read_line(&mut reader)?;
            let mut fields = row.split_whitespace();
            for x in 0..width {
                let amount: u32 = parse_field(fields.next(), &row)?;
                resources.set(Location::new(x as u32, y as u32), amount as f32);
            }
        }

        Ok(Engine {
            reader,
            writer,
            constants,
            num_players,
            my_id,
            homes,
            dims,
            resources,
        })
    }

    /// Announce readiness under the given bot name; the engine starts the
    /// game clock once every player has done this.
    pub fn ready(&mut self, name: &str) -> Result<(), ProtocolError> {
        writeln!(self.writer, "{name}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// The engine's view of the resource grid, current as of the last
    /// `next_turn`.
    pub fn resources(&self) -> &GridArray<f32> {
        &self.resources
    }

    /// Block until the engine sends the next turn, then parse it and fold
    /// the resource diffs into our grid.
    pub fn next_turn(&mut self) -> Result<TurnSnapshot, ProtocolError> {
        let turn_line = read_line(&mut self.reader)?;
        let turn: u32 = parse_field(turn_line.split_whitespace().next(), &turn_line)?;

        let mut banks = vec![0u64; self.num_players];
        let mut units = Vec::new();
        let mut depots = Vec::new();
        for _ in 0..self.num_players {
            let header = read_line(&mut self.reader)?;
            let mut fields = header.split_whitespace();
            let owner = PlayerId(parse_field(fields.next(), &header)?);
            let num_units: usize = parse_field(fields.next(), &header)?;
            let num_depots: usize = parse_field(fields.next(), &header)?;
            let bank: u64 = parse_field(fields.next(), &header)?;
            if (owner.0 as usize) >= self.num_players {
                return Err(ProtocolError::Malformed(header));
            }
            banks[owner.0 as usize] = bank;

            for _ in 0..num_units {
                let line = read_line(&mut self.reader)?;
                let mut fields = line.split_whitespace();
                let id = UnitId(parse_field(fields.next(), &line)?);
                let x: u32 = parse_field(fields.next(), &line)?;
                let y: u32 = parse_field(fields.next(), &line)?;
                let cargo: u32 = parse_field(fields.next(), &line)?;
                units.push(Unit {
                    id,
                    owner,
                    pos: Location::new(x, y),
                    cargo,
                    role: None,
                    next: None,
                    site: None,
                });
            }
            for _ in 0..num_depots {
                let line = read_line(&mut self.reader)?;
                let mut fields = line.split_whitespace();
                let _id: u32 = parse_field(fields.next(), &line)?;
                let x: u32 = parse_field(fields.next(), &line)?;
                let y: u32 = parse_field(fields.next(), &line)?;
                depots.push(Depot {
                    owner,
                    pos: Location::new(x, y),
                    provisional: false,
                });
            }
        }

        let count_line = read_line(&mut self.reader)?;
        let updates: usize = parse_field(count_line.split_whitespace().next(), &count_line)?;
        for _ in 0..updates {
            let line = read_line(&mut self.reader)?;
            let mut fields = line.split_whitespace();
            let x: u32 = parse_field(fields.next(), &line)?;
            let y: u32 = parse_field(fields.next(), &line)?;
            let amount: u32 = parse_field(fields.next(), &line)?;
            self.resources.set(Location::new(x, y), amount as f32);
        }

        Ok(TurnSnapshot {
            turn,
            banks,
            units,
            depots,
        })
    }

    /// Send this turn's commands as a single line.
    pub fn end_turn(&mut self, commands: &[Command]) -> Result<(), ProtocolError> {
        let line = commands.iter().map(|c| c.to_wire()).join(" ");
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, ProtocolError> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(line.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT: &str = "\
{\"MAX_ENERGY\": 1000, \"NEW_ENTITY_ENERGY_COST\": 1000, \"DROPOFF_COST\": 4000, \"MAX_TURNS\": 400}
2 0
0 1 1
1 2 2
4 4
10 20 30 40
50 60 70 80
90 100 110 120
130 140 150 160
";

    const TURN: &str = "\
12
0 2 1 3500
3 0 0 42
5 1 1 900
7 2 2
1 1 0 1200
8 3 3 0
2
0 0 999
2 1 0
";

    fn engine_from(input: &str) -> Engine<std::io::Cursor<String>, Vec<u8>> {
        Engine::init(std::io::Cursor::new(input.to_string()), Vec::new()).unwrap()
    }

    #[test]
    fn handshake_parses_roster_and_grid() {
        let engine = engine_from(INIT);
        assert_eq!(engine.num_players, 2);
        assert_eq!(engine.my_id, PlayerId(0));
        assert_eq!(engine.homes, vec![Location::new(1, 1), Location::new(2, 2)]);
        assert_eq!(engine.dims, GridDims::new(4, 4));
        assert_eq!(engine.constants.depot_cost, 4000);
        assert_eq!(engine.resources().get(Location::new(0, 0)), 10.0);
        assert_eq!(engine.resources().get(Location::new(3, 2)), 120.0);
    }

    #[test]
    fn turn_parses_units_depots_and_diffs() {
        let mut engine = engine_from(&format!("{INIT}{TURN}"));
        let snap = engine.next_turn().unwrap();

        assert_eq!(snap.turn, 12);
        assert_eq!(snap.banks, vec![3500, 1200]);
        assert_eq!(snap.units.len(), 3);

        let mine: Vec<&Unit> = snap
            .units
            .iter()
            .filter(|u| u.owner == PlayerId(0))
            .collect();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, UnitId(3));
        assert_eq!(mine[0].pos, Location::new(0, 0));
        assert_eq!(mine[0].cargo, 42);

        assert_eq!(snap.depots.len(), 1);
        assert_eq!(snap.depots[0].owner, PlayerId(0));
        assert_eq!(snap.depots[0].pos, Location::new(2, 2));
        assert!(!snap.depots[0].provisional);

        // Diffs folded into the mirrored grid.
        assert_eq!(engine.resources().get(Location::new(0, 0)), 999.0);
        assert_eq!(engine.resources().get(Location::new(2, 1)), 0.0);
        assert_eq!(engine.resources().get(Location::new(3, 3)), 160.0);
    }

    #[test]
    fn commands_go_out_as_one_line() {
        let mut engine = engine_from(INIT);
        engine
            .end_turn(&[
                Command::Move {
                    unit: UnitId(3),
                    dir: Direction::North,
                },
                Command::Construct { unit: UnitId(5) },
                Command::Spawn,
            ])
            .unwrap();
        assert_eq!(engine.writer, b"m 3 n c 5 g\n");
    }

    #[test]
    fn truncated_stream_reports_eof() {
        let mut engine = engine_from(INIT);
        assert!(matches!(
            engine.next_turn(),
            Err(ProtocolError::UnexpectedEof)
        ));
    }
}
