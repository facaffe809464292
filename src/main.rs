use config::Config;
use poller::{DisplayState, GlucosePoller};
use tokio::sync::mpsc;

mod client;
mod config;
mod error;
mod normalizer;
mod poller;
mod share_api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("Starting Dexcom Share glucose monitor");
    let config = Config::from_env()?;

    let (update_tx, mut update_rx) = mpsc::channel::<DisplayState>(32);

    // The poller owns the client; it authenticates lazily on the first
    // poll and keeps the session alive across polls.
    let poller = GlucosePoller::start(config, update_tx)?;

    loop {
        tokio::select! {
            state = update_rx.recv() => {
                match state {
                    Some(state) => render(&state),
                    None => break, // Poller stopped on its own
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down");
                poller.shutdown();
                break;
            }
        }
    }

    Ok(())
}

fn render(state: &DisplayState) {
    match state {
        DisplayState::Reading(display) => {
            println!(
                "{} ({}{}) [{}] {}",
                display.text,
                if display.delta.starts_with('-') { "" } else { "+" },
                display.delta,
                display.level.color(),
                display.status
            );
        }
        DisplayState::NoData => println!("No glucose data available"),
        DisplayState::Error {
            message,
            needs_user_action,
        } => {
            if *needs_user_action {
                eprintln!("Error (check credentials/settings): {message}");
            } else {
                eprintln!("Error: {message}");
            }
        }
    }
}
