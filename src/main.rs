use anyhow::Context;
use log::{debug, error};

use remat_harness::harness::Harness;
use remat_harness::options::Options;

fn main() {
    if std::env::var("REMAT_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("REMAT_LOG")
            .write_style("REMAT_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    if let Err(err) = run() {
        error!("{:#}", err);
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let flags = std::env::var("REMAT_FLAGS").unwrap_or_default();
    let options = Options::parse_from_str(&flags).context("invalid REMAT_FLAGS")?;
    debug!("options from environment: {:?}", options);

    let config = options.load_config()?;
    let mut harness = Harness::fail_fast(config)?;
    let report = harness.run()?;

    if let Some(path) = &options.output {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to write report to {}", path))?;
    }
    Ok(())
}
