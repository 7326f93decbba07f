mod config;
mod lines;
mod monitor;
mod pidfile;
mod policy;
mod powerkill;
mod shutdown;
mod signals;
mod statusfile;
mod tracker;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Watches a dumb UPS over RS-232 control lines: debounces the
/// power-fail and low-battery signals, counts down through an outage,
/// and takes the host down cleanly before the battery gives out.
#[derive(Parser, Debug)]
#[command(name = "upswatch", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "/etc/upswatch.toml")]
    config: PathBuf,

    /// Serial device wired to the UPS (overrides config)
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Seconds of outage to tolerate before shutting down (overrides config)
    #[arg(short, long)]
    wait: Option<u64>,

    /// Send the UPS power-cut command immediately and exit
    #[arg(short, long)]
    kill: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-sample debounce decisions)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let mut cfg = match config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    cfg.apply_overrides(cli.device.clone(), cli.wait);

    if cli.dry_run {
        println!("device      = {}", cfg.monitor.device.display());
        println!("wait_secs   = {}", cfg.monitor.wait_secs);
        println!("kill_secs   = {}", cfg.ups.kill_secs);
        println!("pidfile     = {}", cfg.daemon.pidfile.display());
        match &cfg.daemon.status_file {
            Some(path) => println!("status_file = {}", path.display()),
            None => println!("status_file = (disabled)"),
        }
        return ExitCode::SUCCESS;
    }

    run(cli, cfg).await
}

async fn run(cli: Cli, cfg: config::UpswatchConfig) -> ExitCode {
    // An unopenable device is fatal before anything else: with no lines
    // to read there is nothing to monitor.
    let mut serial = match lines::SerialLines::open(&cfg.monitor.device) {
        Ok(serial) => serial,
        Err(e) => {
            error!(error = %e, "cannot open monitor device");
            return ExitCode::FAILURE;
        }
    };

    let kill_hold = Duration::from_secs(cfg.ups.kill_secs);

    if cli.kill {
        // Operator-invoked power cut: bypasses monitoring entirely.
        return match powerkill::cut_ups_power(&mut serial, kill_hold) {
            Ok(outcome) => {
                eprintln!("{outcome}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "ups power cut command failed");
                ExitCode::FAILURE
            }
        };
    }

    // Refuse to double-monitor the device. Checked before any output
    // line is touched.
    let pidfile = match pidfile::PidFile::acquire(&cfg.daemon.pidfile) {
        Ok(pidfile) => pidfile,
        Err(e) => {
            error!(error = %e, "startup refused");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = serial.power_cable() {
        error!(error = %e, "cannot power the signal cable");
        pidfile.release();
        return ExitCode::FAILURE;
    }

    let mut termination = match signals::Termination::install() {
        Ok(termination) => termination,
        Err(e) => {
            error!(error = %e, "cannot install signal handlers");
            pidfile.release();
            return ExitCode::FAILURE;
        }
    };

    info!(
        device = %cfg.monitor.device.display(),
        wait_secs = cfg.monitor.wait_secs,
        "started"
    );

    let sink = cfg.daemon.status_file.clone().map(statusfile::StatusSink::new);
    let mut mon = monitor::Monitor::new(serial, cfg.monitor.wait_secs, sink);

    match mon.run(&mut termination).await {
        Ok(monitor::MonitorExit::Terminated(signal)) => {
            mon.remove_status();
            pidfile.release();
            info!(signal, "stopped");
            ExitCode::SUCCESS
        }
        Ok(monitor::MonitorExit::Shutdown(reason)) => {
            match reason {
                policy::ShutdownReason::BatteryLow => {
                    error!("power has failed and battery is low");
                }
                policy::ShutdownReason::DeadlineExpired => {
                    error!("shutdown deadline reached");
                }
            }
            let mut serial = mon.into_lines();
            shutdown::run_shutdown_sequence(&mut shutdown::Host, &mut serial, kill_hold);
            // Reached only if the reboot itself was refused.
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "monitor device failed");
            pidfile.release();
            ExitCode::FAILURE
        }
    }
}
