//! Deterministic fixture runner for mod scripts.
//!
//! A fixture names a mod table, a frame count and a few player overrides. Running it initializes a
//! [`ScriptHost`], steps the frames and summarizes what the scripts did, so the output can be
//! compared against a checked-in golden file.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{HostRole, ModEntry, ScriptingConfig};
use crate::error::ScriptError;
use crate::scripts::ScriptHost;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    #[serde(default)]
    pub role: HostRole,
    #[serde(default = "default_frames")]
    pub frames: usize,
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    /// Paths are relative to the fixture file.
    pub mods: Vec<ModEntry>,
    #[serde(default)]
    pub players: Vec<FixturePlayer>,
    #[serde(default)]
    pub inspect: Vec<GlobalProbe>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixturePlayer {
    pub slot: usize,
    #[serde(default)]
    pub health: Option<i16>,
    #[serde(default)]
    pub coins: Option<i16>,
    #[serde(default)]
    pub lives: Option<i8>,
    #[serde(default)]
    pub stars: Option<i16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalProbe {
    pub script: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub role: HostRole,
    pub frames: usize,
    pub loaded: Vec<String>,
    pub skipped: Vec<String>,
    pub init_logs: Vec<String>,
    pub init_failures: Vec<FailureSummary>,
    pub results: Vec<FrameResult>,
    pub final_players: Vec<PlayerSummary>,
    pub globals: Vec<GlobalSummary>,
}

impl HarnessOutput {
    pub fn failure_counts(&self) -> FailureCounts {
        FailureCounts {
            load: self.init_failures.len(),
            hook: self.results.iter().map(|frame| frame.failures.len()).sum(),
        }
    }

    pub fn hooks_invoked(&self) -> usize {
        self.results.iter().map(|frame| frame.hooks_invoked).sum()
    }
}

/// Failures recorded by one fixture run, split by phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailureCounts {
    pub load: usize,
    pub hook: usize,
}

impl FailureCounts {
    pub fn total(self) -> usize {
        self.load + self.hook
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameResult {
    pub frame: usize,
    pub hooks_invoked: usize,
    pub logs: Vec<String>,
    pub failures: Vec<FailureSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureSummary {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSummary {
    pub slot: usize,
    pub health: i16,
    pub coins: i16,
    pub lives: i8,
    pub stars: i16,
    pub action: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalSummary {
    pub script: String,
    pub name: String,
    pub value: Option<serde_json::Value>,
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    let resolved: Vec<(String, PathBuf)> = fixture
        .mods
        .iter()
        .map(|entry| (entry.path.display().to_string(), fixture.base_dir.join(&entry.path)))
        .collect();

    let mut config = ScriptingConfig {
        role: fixture.role,
        max_players: fixture.max_players,
        seed: fixture.seed,
        ..ScriptingConfig::default()
    };
    let table: Vec<ModEntry> =
        fixture.mods.iter().zip(&resolved).map(|(entry, (_, path))| ModEntry::new(path, entry.enabled)).collect();
    match fixture.role {
        HostRole::Server => config.mods.local = table,
        HostRole::Client => config.mods.remote = table,
    }

    let mut host = ScriptHost::new(config);
    for player in &fixture.players {
        host.players()
            .with_player_mut(player.slot, |state| {
                if let Some(health) = player.health {
                    state.health = health;
                }
                if let Some(coins) = player.coins {
                    state.coins = coins;
                }
                if let Some(lives) = player.lives {
                    state.lives = lives;
                }
                if let Some(stars) = player.stars {
                    state.stars = stars;
                }
            })
            .with_context(|| format!("fixture player slot {} is out of range", player.slot))?;
    }

    let report = host.initialize();
    if let Some(err) = &report.setup_error {
        anyhow::bail!("scripting setup failed: {err}");
    }
    let label = |path: &Path| {
        resolved.iter().find(|(_, full)| full == path).map(|(name, _)| name.clone()).unwrap_or_default()
    };
    let loaded = report.loaded.iter().map(|path| label(path.as_path())).collect();
    let skipped = report.skipped.iter().map(|path| label(path.as_path())).collect();
    let init_failures = report.failures.iter().map(|err| summarize_failure(err, &resolved)).collect();
    let init_logs = host.take_logs();
    host.take_failures();

    let mut results = Vec::with_capacity(fixture.frames);
    for frame in 0..fixture.frames {
        let dispatch = host.run_frame();
        results.push(FrameResult {
            frame,
            hooks_invoked: dispatch.invoked,
            logs: host.take_logs(),
            failures: dispatch.failures.iter().map(|err| summarize_failure(err, &resolved)).collect(),
        });
    }

    let final_players = host
        .players()
        .snapshot()
        .iter()
        .enumerate()
        .map(|(slot, state)| PlayerSummary {
            slot,
            health: state.health,
            coins: state.coins,
            lives: state.lives,
            stars: state.stars,
            action: state.action,
        })
        .collect();

    let globals = fixture
        .inspect
        .iter()
        .map(|probe| {
            let path = fixture.base_dir.join(&probe.script);
            let value = host
                .script_global(&path, &probe.name)
                .and_then(|value| rhai::serde::from_dynamic::<serde_json::Value>(&value).ok());
            GlobalSummary { script: probe.script.clone(), name: probe.name.clone(), value }
        })
        .collect();

    host.shutdown();
    Ok(HarnessOutput {
        role: fixture.role,
        frames: fixture.frames,
        loaded,
        skipped,
        init_logs,
        init_failures,
        results,
        final_players,
        globals,
    })
}

fn summarize_failure(err: &ScriptError, scripts: &[(String, PathBuf)]) -> FailureSummary {
    let script = scripts
        .iter()
        .find(|(_, path)| match err {
            ScriptError::Compile { path: failed, .. } | ScriptError::Duplicate { path: failed } => failed == path,
            ScriptError::Runtime { origin, .. } => origin.contains(&path.display().to_string()),
            ScriptError::Setup(_) => false,
        })
        .map(|(name, _)| name.clone());
    FailureSummary { kind: err.label().to_string(), script }
}

/// Golden output checked in next to a fixture: `name.json` pairs with `name.golden.json`.
pub fn golden_path_for(fixture: &Path) -> PathBuf {
    let stem = fixture.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
    fixture.with_file_name(format!("{stem}.golden.json"))
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening fixture '{}'", path.display()))?;
    let mut fixture: HarnessFixture = serde_json::from_reader(file).with_context(|| "parsing fixture JSON")?;
    fixture.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(fixture)
}

fn default_frames() -> usize {
    3
}

fn default_max_players() -> usize {
    2
}

fn default_seed() -> Option<u64> {
    Some(1)
}
