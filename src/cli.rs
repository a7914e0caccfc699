use crate::config::{HostRole, ScriptingConfigOverrides};
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    frames: Option<u32>,
    role: Option<HostRole>,
    players: Option<usize>,
    hot_reload: Option<bool>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Use --config/--frames/--role/--players with values.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(PathBuf::from(value)),
                "frames" => {
                    overrides.frames =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid frame count '{value}'"))?);
                }
                "role" => {
                    let role = HostRole::parse(&value)
                        .ok_or_else(|| anyhow!("Invalid role '{value}'. Use server or client."))?;
                    overrides.role = Some(role);
                }
                "players" => {
                    overrides.players =
                        Some(value.parse::<usize>().with_context(|| format!("Invalid player count '{value}'"))?);
                }
                "hot-reload" => {
                    overrides.hot_reload = Some(parse_bool_flag("hot-reload", &value)?);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --config, --frames, --role, --players, --hot-reload."
                ),
            }
        }
        Ok(overrides)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    pub fn frames(&self) -> Option<u32> {
        self.frames
    }

    pub fn into_config_overrides(self) -> ScriptingConfigOverrides {
        ScriptingConfigOverrides { role: self.role, max_players: self.players, hot_reload: self.hot_reload }
    }
}

/// What the fixture harness does with each run's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GoldenMode {
    /// Print the output as JSON on stdout.
    #[default]
    Print,
    /// Compare against the checked-in golden file.
    Check,
    /// Overwrite the golden file.
    Bless,
}

/// Arguments of the `script_harness` binary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HarnessArgs {
    pub fixtures: Vec<PathBuf>,
    pub mode: GoldenMode,
    /// Fixtures that record load or hook failures still pass.
    pub allow_failures: bool,
}

impl HarnessArgs {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = HarnessArgs::default();
        let mut modes = 0;
        for arg in args.into_iter().skip(1) {
            match arg.as_ref() {
                "--check" => {
                    parsed.mode = GoldenMode::Check;
                    modes += 1;
                }
                "--bless" => {
                    parsed.mode = GoldenMode::Bless;
                    modes += 1;
                }
                "--allow-failures" => parsed.allow_failures = true,
                flag if flag.starts_with("--") => {
                    bail!("Unknown flag '{flag}'. Supported flags: --check, --bless, --allow-failures.")
                }
                path => parsed.fixtures.push(PathBuf::from(path)),
            }
        }
        if modes > 1 {
            bail!("--check and --bless are exclusive");
        }
        if parsed.fixtures.is_empty() {
            bail!("Usage: script_harness [--check | --bless] [--allow-failures] <fixture.json>...");
        }
        Ok(parsed)
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}
