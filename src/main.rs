//! imhostd - modular input-method host for Linux
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Host Tick Loop                │
//! ├──────────────────────────────────────────┤
//! │  prepare_fds  →  select(2)  →  process   │
//! │       ↑                           ↓      │
//! │  D-Bus bridge (watches)     XIM backend  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Each module declares descriptor interest per tick; the host performs
//! the single blocking wait and routes readiness back. Modules that fail
//! to initialize are disabled, never fatal.

mod bus;
mod config;
mod host;
mod xim;

use std::rc::Rc;

use anyhow::Result;
use log::{info, warn};

use bus::libdbus::DBusSession;
use bus::session::BusSession;
use bus::BusModule;
use config::Config;
use host::Host;
use xim::XimBackend;

fn print_help() {
    println!(
        r#"imhostd {} - modular input-method host for Linux

USAGE:
    imhostd [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information

CONFIGURATION:
    IMHOSTD_CONFIG environment variable, or
    ~/.config/imhostd/config.toml, or
    /etc/imhostd/config.toml"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Check command line arguments
    let args: Vec<String> = std::env::args().collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("imhostd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    info!("imhostd starting...");

    let cfg = Config::load();
    host::setup_shutdown_handler();

    let mut host = Host::new(cfg.host.tick_timeout());

    let bus_module = if cfg.bus.enabled {
        BusModule::create(
            || DBusSession::connect().map(|s| Rc::new(s) as Rc<dyn BusSession>),
            &cfg.bus.service_name,
        )
    } else {
        None
    };
    let bus_handle = bus_module.as_ref().map(BusModule::handle);

    let xim_module = if cfg.xim.enabled {
        let mut xim_cfg = cfg.xim.clone();
        if xim_cfg.display.is_empty() {
            xim_cfg.display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
        }
        XimBackend::create(&xim_cfg, bus_handle)
    } else {
        None
    };

    host.register("dbus", bus_module);
    host.register("xim", xim_module);

    if host.module_count() == 0 {
        warn!("no modules enabled; running an empty host loop");
    }

    // Notify systemd that we're ready
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    host.run()?;

    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
    host.shutdown();
    info!("imhostd stopped");
    Ok(())
}
