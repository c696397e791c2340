//! backend_probe - report which inference backends this host can run
//!
//! Prints the hardware report and the selection `countd` would make for the
//! configured (or overridden) backend preference.

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use counting_kernel::{select, BackendPreference, CountdConfig, HardwareReport, SystemProbe};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "COUNTD_CONFIG")]
    config: Option<PathBuf>,
    /// Backend preference to resolve instead of the configured one.
    #[arg(long)]
    backend: Option<BackendPreference>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let cfg = CountdConfig::load_from(args.config.as_deref())?;
    let preference = args.backend.unwrap_or(cfg.detection.preferred_backend);
    let artifacts = cfg.detection.artifacts();

    let report = HardwareReport::collect(&artifacts, &SystemProbe);
    let selection = select(preference, &artifacts, &SystemProbe);

    let out = json!({
        "preference": preference.as_str(),
        "report": report,
        "selection": selection,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
