pub mod camera;
pub mod config;
pub mod diagnostics;
pub mod preview;
pub mod screens;

use std::io::BufRead;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing_subscriber::EnvFilter;

use camera::backend::{CameraBackend, NullBackend};
use camera::dummy::DummyBackend;
use config::AppConfig;
use screens::navigator::{Flow, Navigator};
use screens::ui::{Command, UiMessage};

/// Create the camera backend for the current configuration.
///
/// When `DUMMY_CAMERA=1` is set, a simulated camera is used instead.
pub fn create_backend(config: &AppConfig) -> Arc<dyn CameraBackend> {
    if config.dummy_camera {
        tracing::info!("using dummy camera backend");
        return Arc::new(DummyBackend::new());
    }
    Arc::new(NullBackend)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Forward terminal lines to the UI queue until stdin closes.
fn spawn_input_reader(tx: Sender<UiMessage>) {
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(command) => {
                        if tx.send(UiMessage::Command(command)).is_err() {
                            return;
                        }
                    }
                    None => eprintln!("unknown command {:?} (n, b, s, q)", line.trim()),
                }
            }
            let _ = tx.send(UiMessage::InputClosed);
        });
    if let Err(e) = spawned {
        tracing::error!("failed to spawn input reader: {e}");
    }
}

fn print_current(nav: &Navigator) {
    if let Some(screen) = nav.current() {
        println!("== {} ==", screen.id().title());
    }
}

fn print_reports(nav: &Navigator) {
    for screen in nav.screens() {
        match serde_json::to_string(&screen.report()) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!("failed to serialize report: {e}"),
        }
    }
}

/// Drain the UI queue on the calling thread until a quit is requested.
fn ui_loop(nav: &mut Navigator, rx: &Receiver<UiMessage>) {
    while let Ok(message) = rx.recv() {
        match &message {
            UiMessage::Status { screen, event } => {
                if let Some(s) = nav.find(*screen) {
                    println!("[{}] {}", s.id().title(), event.message);
                }
            }
            UiMessage::Command(Command::Status) => print_reports(nav),
            _ => {}
        }
        let navigated = matches!(
            message,
            UiMessage::Command(Command::Next) | UiMessage::Command(Command::Back)
        );
        if nav.handle(message) == Flow::Exit {
            return;
        }
        if navigated {
            print_current(nav);
        }
    }
}

pub fn run() {
    init_logging();
    let config = AppConfig::from_env();
    tracing::debug!(?config, "starting");

    let backend = create_backend(&config);
    let (tx, rx) = crossbeam_channel::unbounded();

    let mut nav = Navigator::new(backend, config, tx.clone());
    println!("commands: n = next, b = back, s = status, q = quit");
    nav.launch();
    print_current(&nav);

    spawn_input_reader(tx);
    ui_loop(&mut nav, &rx);
    nav.shutdown();
    tracing::info!("shut down");
}
