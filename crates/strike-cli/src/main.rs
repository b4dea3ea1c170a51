//! `strike-cli` – StrikeLoop installation controller.
//!
//! The binary wires the whole stack together:
//!
//! 1. Initialises structured logging (`RUST_LOG`, `STRIKE_LOG_FORMAT=json`).
//! 2. Loads `~/.strikeloop/config.toml` (creating a default on first run),
//!    with `STRIKE_*` environment overrides and an optional hardware-mode
//!    command-line argument (`strikeloop hardware`).
//! 3. Opens the controller serial port when the mode requires it, waiting
//!    out the bootloader reset before the first command.
//! 4. Bridges the HAL's simulation LED events and the serial link's input
//!    events onto the event bus.
//! 5. Runs the game engine and the staff/display WebSocket servers.
//! 6. Intercepts **Ctrl-C** to broadcast a hard reset before exiting.

mod config;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use strike_broadcast::{BroadcastServer, EventBus};
use strike_engine::{EngineConfig, GameEngine, RoundTable};
use strike_hal::{remap, Hal};
use strike_serial::{LinkEvent, SerialLink, SerialLinkConfig};
use strike_types::{ControlEvent, HalMode};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    init_logging();
    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  Default config written to {}",
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Config error".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // The first CLI argument overrides the hardware mode, matching how the
    // installation is launched from its systemd unit.
    if let Some(arg) = std::env::args().nth(1) {
        match arg.parse::<HalMode>() {
            Ok(mode) => cfg.hardware_mode = mode,
            Err(e) => warn!(%arg, error = %e, "ignoring hardware mode argument"),
        }
    }
    info!(mode = %cfg.hardware_mode, "hardware mode selected");

    let bus = Arc::new(EventBus::default());

    // ── Ctrl-C: broadcast a hard reset, then exit ─────────────────────────
    {
        let bus = Arc::clone(&bus);
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "  Ctrl-C received – resetting installation …".yellow().bold());
            let _ = bus.publish_control(ControlEvent::HardReset);
            // Give the engine a beat to tear down timers and clear LEDs.
            std::thread::sleep(Duration::from_millis(300));
            println!("{}", "  Goodbye.".green());
            std::process::exit(0);
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    // ── Serial link (hardware modes only) ─────────────────────────────────
    let link = if matches!(cfg.hardware_mode, HalMode::Hardware | HalMode::Both) {
        let link_config = SerialLinkConfig {
            vendor_id: cfg.serial_vendor_id.clone(),
            ..SerialLinkConfig::default()
        };
        match SerialLink::open(link_config).await {
            Ok(link) => {
                info!("controller serial link up");
                Some(link)
            }
            Err(e) => {
                // Degraded mode: the game still runs, LED writes are dropped.
                error!(error = %e, "serial link unavailable, continuing degraded");
                None
            }
        }
    } else {
        None
    };

    let hal = Hal::new(cfg.hardware_mode, link.clone());

    // ── Bridges onto the bus ──────────────────────────────────────────────
    // Simulation LED events fan out to the UI clients.
    {
        let bus = Arc::clone(&bus);
        let mut leds = hal.subscribe_leds();
        tokio::spawn(async move {
            while let Ok(event) = leds.recv().await {
                let _ = bus.publish_game(event);
            }
        });
    }
    // Hardware input frames become control events, reverse-mapped through
    // the wiring table.
    if let Some(link) = &link {
        let bus = Arc::clone(&bus);
        let mut events = link.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    LinkEvent::Input(input) => match input.code.parse::<u8>() {
                        Ok(hardware_id) => {
                            let logical = remap::to_logical_id(hardware_id);
                            let _ = bus.publish_control(ControlEvent::InputEvent {
                                code: logical.to_string(),
                                value: input.value,
                            });
                        }
                        Err(_) => {
                            warn!(code = %input.code, value = input.value, "non-numeric input code ignored");
                        }
                    },
                    LinkEvent::CommandFailed { reason } => {
                        warn!(%reason, "controller command failed");
                    }
                }
            }
        });
    }

    // ── Engine ────────────────────────────────────────────────────────────
    let engine = GameEngine::new(
        Arc::clone(&hal),
        Arc::clone(&bus),
        RoundTable::builtin(),
        EngineConfig {
            session_minutes: cfg.session_minutes,
            ..EngineConfig::default()
        },
    );
    tokio::spawn(engine.run());

    // ── WebSocket fan-out (runs forever) ──────────────────────────────────
    println!(
        "  Staff console on ws://0.0.0.0:{}, displays on ws://0.0.0.0:{}\n",
        cfg.staff_port.to_string().bold(),
        cfg.display_port.to_string().bold()
    );
    if let Err(e) = BroadcastServer::new(bus)
        .with_ports(cfg.staff_port, cfg.display_port)
        .run()
        .await
    {
        error!(error = %e, "broadcast server failed");
        std::process::exit(1);
    }
}

fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("STRIKE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ______       _ __        __                  "#.bold().cyan());
    println!("{}", r#"  / __/ /______(_) /_____  / /  ___  ___  ___   "#.bold().cyan());
    println!("{}", r#" _\ \/ __/ __/ / '_/ -_) / /__/ _ \/ _ \/ _ \  "#.bold().cyan());
    println!("{}", r#"/___/\__/_/ /_/_/\_\\__/ /____/\___/\___/ .__/  "#.bold().cyan());
    println!("{}", r#"                                       /_/      "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "StrikeLoop".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Arcade installation controller");
    println!();
}
