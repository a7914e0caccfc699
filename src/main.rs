use std::path::Path;

use kestrel_modding::cli::CliOverrides;
use kestrel_modding::logging::init_logging;
use kestrel_modding::{ScriptHost, ScriptingConfig};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "config/scripting.json";
const DEFAULT_FRAMES: u32 = 60;

fn main() {
    init_logging("kestrel_modding");
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            error!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config_path = cli.config_path().cloned().unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());
    let frames = cli.frames().unwrap_or(DEFAULT_FRAMES);

    let mut config = if Path::new(&config_path).exists() {
        ScriptingConfig::load_or_default(&config_path)
    } else {
        warn!("Config file {} not found, using defaults", config_path.display());
        ScriptingConfig::default()
    };
    let overrides = cli.into_config_overrides();
    if !overrides.is_empty() {
        info!("Applying CLI overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    let hot_reload = config.hot_reload;

    let mut host = ScriptHost::new(config);
    let report = host.initialize();
    if let Some(err) = report.setup_error {
        error!("Scripting unavailable: {err}");
        std::process::exit(1);
    }

    let mut hook_failures = 0;
    for _ in 0..frames {
        if hot_reload {
            host.reload_if_changed();
        }
        hook_failures += host.run_frame().failures.len();
    }

    info!(
        "Ran {frames} frame(s): {} script(s) loaded, {} load failure(s), {hook_failures} hook failure(s)",
        report.loaded.len(),
        report.failures.len()
    );
    host.shutdown();
}
