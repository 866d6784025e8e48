//! syncsound simulator.
//!
//! Hosts one card on a virtual bus and drives it from JSON-line commands on
//! stdin, reporting period events and results as JSON lines on stdout.

mod ipc;
mod logging;
mod sim;

use std::time::Duration;

use tracing::{info, warn};

use ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use ipc::{SimCommand, SimEvent};
use sim::Simulator;
use syncsound::config::read_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = read_config();
    logging::init(config.log_dir.as_deref())?;
    info!(?config, "Configuration loaded");

    let (mut sim, mut period_rx) = Simulator::new(&config);
    let mut cmd_rx = spawn_stdin_reader();

    let mut ticker = tokio::time::interval(Duration::from_millis(config.simulator.tick_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    emit_event(&SimEvent::Ready {
        driver: sim.card().card_info().driver.clone(),
        channels: sim.card().channels().count(),
    });
    info!("Simulator ready");

    // Main loop: commands, bus ticks, period notifications
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(&mut sim, command) {
                            break;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                sim.tick();
            }
            Some((channel, direction)) = period_rx.recv() => {
                emit_event(&SimEvent::PeriodElapsed { channel, direction });
            }
        }
    }

    sim.shutdown();
    info!("Simulator shutting down");
    Ok(())
}

/// Handle a single command.
/// Returns `false` if the main loop should exit.
fn handle_command(sim: &mut Simulator, cmd: SimCommand) -> bool {
    if let SimCommand::Quit {} = cmd {
        emit_event(&SimEvent::Stopping {});
        return false;
    }
    let name = cmd.name();
    match sim.execute(cmd) {
        Ok(event) => emit_event(&event),
        Err(e) => {
            warn!(command = name, error = %e, "Command failed");
            emit_error(&e.to_string(), Some(e.errno()));
        }
    }
    true
}
