//! epm - Score an elevated-plus-maze recording.
//!
//! `analyze` restores the saved session, runs the configured engine over the
//! trim window and prints the per-zone summary. `session` inspects or clears
//! the saved session.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;

use epm_analyzer::session::keys;
use epm_analyzer::{
    AnalyzerConfig, DeviceCapabilities, DevicePreference, Orchestrator, RunResult, RunState,
    SessionState, StandardEngines,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "epm", about = "Elevated-plus-maze behavioral scoring")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an analysis and persist the result in the session
    Analyze {
        /// Analyzer config (TOML, or JSON by extension)
        #[arg(long, value_name = "PATH", env = "EPM_CONFIG")]
        config: Option<PathBuf>,

        /// Write the full result (trajectory, metrics, provenance) as JSON
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// UI mode for stderr progress (auto|plain|pretty)
        #[arg(long, default_value = "auto", value_name = "MODE")]
        ui: String,
    },
    /// Inspect or modify the saved session
    Session {
        /// Session file (defaults to the configured path)
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,

        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// Print the saved session
    Show,
    /// Delete the saved session (logout)
    Clear,
    /// Persist the compute-device preference (auto|cpu)
    SetDevice { preference: DevicePreference },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Analyze { config, out, ui } => analyze(config, out, &ui),
        Command::Session { path, action } => session(path, action),
    }
}

fn analyze(config_path: Option<PathBuf>, out: Option<PathBuf>, ui_flag: &str) -> Result<()> {
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(ui_flag), is_tty, !stdout_is_tty);

    let mut config = {
        let _stage = ui.stage("Load configuration");
        AnalyzerConfig::load_from(config_path.as_deref())?
    };

    let session = {
        let _stage = ui.stage("Restore session");
        match SessionState::open(&config.session_path) {
            Ok(session) => session,
            Err(err) => {
                log::warn!("ignoring unreadable session: {err:#}");
                SessionState::new(&config.session_path)
            }
        }
    };
    if let Err(err) = config.fill_from_session(&session) {
        log::warn!("session values not applied: {err:#}");
    }
    let run_config = config.run_config()?;

    let capabilities = {
        let _stage = ui.stage("Probe compute devices");
        DeviceCapabilities::probe()
    };
    let mut orchestrator = Orchestrator::new(session, capabilities, Box::new(StandardEngines));

    let cancel = orchestrator.cancel_flag();
    ctrlc::set_handler(move || {
        log::warn!("cancellation requested; stopping at the next checkpoint");
        cancel.cancel();
    })
    .expect("error setting Ctrl-C handler");

    orchestrator.configure(run_config)?;
    orchestrator.start()?;
    let mut progress = ui.progress("Analyze");
    let state = orchestrator.wait(|fraction| progress.update(fraction));

    match state {
        RunState::Completed => {
            progress.finish("✔ Analyze");
            let result = orchestrator
                .last_result()
                .ok_or_else(|| anyhow!("run completed without a result"))?;
            print_summary(result);
            if let Some(out) = out {
                let json = serde_json::to_vec_pretty(result)?;
                std::fs::write(&out, json)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                println!("result written to {}", out.display());
            }
            Ok(())
        }
        RunState::Cancelled => {
            progress.finish("✖ Analyze (cancelled)");
            Err(anyhow!("run cancelled"))
        }
        _ => {
            progress.finish("✖ Analyze (failed)");
            match orchestrator.last_error() {
                Some(err) => Err(anyhow!(err.clone())),
                None => Err(anyhow!("run ended in state {state:?}")),
            }
        }
    }
}

fn print_summary(result: &RunResult) {
    let m = &result.metrics;
    let p = &result.provenance;
    if p.simulated {
        println!("WARNING: simulated engine; not valid for scoring");
    }
    println!(
        "engine={} backend={} device={} rate={:.2}Hz config={}",
        p.engine,
        p.backend,
        p.device,
        p.sampling_rate_hz,
        &p.config_fingerprint[..p.config_fingerprint.len().min(16)]
    );
    if p.timestamp_regressions > 0 {
        println!("timestamp regressions clamped: {}", p.timestamp_regressions);
    }
    println!();
    println!("{:<20} {:>10}", "zone", "seconds");
    for (zone, seconds) in &m.per_zone_seconds {
        println!("{zone:<20} {seconds:>10.2}");
    }
    println!();
    println!("total time       {:>10.2} s", m.total_time_s);
    println!("distance         {:>10.1} px", m.total_distance);
    println!("average speed    {:>10.2} px/s", m.avg_speed);
    println!("immobility       {:>10.1} %", m.immobility_pct);
    println!("entries          {:>10}", m.entries_count);
    println!("open arms        {:>10.2} s", m.open_arm_seconds);
    println!("closed arms      {:>10.2} s", m.closed_arm_seconds);
    println!("anxiety index    {:>10.1} %", m.anxiety_index);
    println!("not detected     {:>10.1} %", m.not_detected_pct);
}

fn session(path: Option<PathBuf>, action: SessionAction) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => AnalyzerConfig::load()?.session_path,
    };
    let mut session = SessionState::open(&path)?;
    match action {
        SessionAction::Show => {
            let mut value = session.as_value();
            if let Some(result) = value.get_mut(keys::RUN_RESULT) {
                // The trajectory is too long to be useful here.
                if let Some(obj) = result.as_object_mut() {
                    obj.remove("trajectory");
                }
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        SessionAction::Clear => {
            session.clear()?;
            println!("session {} cleared", path.display());
        }
        SessionAction::SetDevice { preference } => {
            session.set_device_preference(preference)?;
            println!("device preference set to {preference}");
        }
    }
    Ok(())
}
