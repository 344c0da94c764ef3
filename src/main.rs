use anyhow::Result;
use dredger::context::PersistentContext;
use dredger::engine::{Engine, ProtocolError};
use dredger::scheduler::{run_turn, TurnBudget};
use dredger::state::TurnState;
use log::*;

fn main() -> Result<()> {
    // Stdout belongs to the engine protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut engine = Engine::init(stdin.lock(), stdout.lock())?;

    let mut ctx = PersistentContext::new(
        engine.dims,
        engine.num_players,
        engine.my_id,
        engine.homes[engine.my_id.0 as usize],
        engine.constants,
        engine.resources(),
    );
    engine.ready("dredger")?;
    info!(
        "ready: player {:?} of {} on {}x{}",
        engine.my_id, engine.num_players, engine.dims.width, engine.dims.height
    );

    loop {
        let snapshot = match engine.next_turn() {
            Ok(snapshot) => snapshot,
            Err(ProtocolError::UnexpectedEof) => break,
            Err(err) => return Err(err.into()),
        };
        let budget = TurnBudget::starting_now();

        let commands = {
            let mut st = TurnState::new(&mut ctx, &snapshot, engine.resources());
            run_turn(&mut st, &budget)
        };

        info!("turn {} planned in {:?}", snapshot.turn, budget.elapsed());
        engine.end_turn(&commands)?;
    }
    Ok(())
}
