use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use kestrel_modding::cli::{GoldenMode, HarnessArgs};
use kestrel_modding::logging::init_logging;
use kestrel_modding::script_harness::{golden_path_for, load_fixture, run_fixture, HarnessOutput};
use tracing::{error, info, warn};

fn main() {
    init_logging("script_harness");
    let args = match HarnessArgs::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            error!("[cli] {err}");
            std::process::exit(2);
        }
    };

    let mut failed = 0;
    for fixture in &args.fixtures {
        match run_one(fixture, &args) {
            Ok(true) => {}
            Ok(false) => failed += 1,
            Err(err) => {
                error!("{}: {err:?}", fixture.display());
                failed += 1;
            }
        }
    }
    info!("{}/{} fixture(s) passed", args.fixtures.len() - failed, args.fixtures.len());
    if failed > 0 {
        std::process::exit(1);
    }
}

/// Runs one fixture. `Ok(false)` means it ran but did not pass.
fn run_one(path: &Path, args: &HarnessArgs) -> Result<bool> {
    let output = run_fixture(&load_fixture(path)?)?;
    let counts = output.failure_counts();
    info!(
        "{}: {} loaded, {} skipped, {} hook call(s), {} load failure(s), {} hook failure(s)",
        path.display(),
        output.loaded.len(),
        output.skipped.len(),
        output.hooks_invoked(),
        counts.load,
        counts.hook
    );

    let golden = golden_path_for(path);
    let mut passed = true;
    match args.mode {
        GoldenMode::Print => println!("{}", serde_json::to_string_pretty(&output)?),
        GoldenMode::Bless => {
            fs::write(&golden, serde_json::to_string_pretty(&output)? + "\n")
                .with_context(|| format!("writing golden file '{}'", golden.display()))?;
            info!("{}: wrote {}", path.display(), golden.display());
        }
        GoldenMode::Check => {
            let file = File::open(&golden).with_context(|| format!("opening golden file '{}'", golden.display()))?;
            let expected: HarnessOutput = serde_json::from_reader(file)
                .with_context(|| format!("parsing golden file '{}'", golden.display()))?;
            if expected != output {
                error!("{}: output differs from {} (rerun with --bless to accept)", path.display(), golden.display());
                passed = false;
            }
        }
    }

    if counts.total() > 0 && !args.allow_failures {
        warn!("{}: {} script failure(s) recorded; pass --allow-failures to accept them", path.display(), counts.total());
        passed = false;
    }
    Ok(passed)
}
