use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::console::DEFAULT_CONSOLE_CAPACITY;
use crate::player::{DEFAULT_MAX_PLAYERS, MAX_PLAYER_SLOTS};

/// Which side of a session this process runs. Servers load their own mod list, clients load the list
/// the server announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    #[default]
    Server,
    Client,
}

impl HostRole {
    pub fn label(self) -> &'static str {
        match self {
            HostRole::Server => "server",
            HostRole::Client => "client",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "server" | "host" => Some(HostRole::Server),
            "client" => Some(HostRole::Client),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModEntry {
    pub path: PathBuf,
    #[serde(default = "ModEntry::default_enabled")]
    pub enabled: bool,
}

impl ModEntry {
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self { path: path.into(), enabled }
    }

    const fn default_enabled() -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModTables {
    #[serde(default)]
    pub local: Vec<ModEntry>,
    #[serde(default)]
    pub remote: Vec<ModEntry>,
}

impl ModTables {
    pub fn select(&self, role: HostRole) -> &[ModEntry] {
        match role {
            HostRole::Server => &self.local,
            HostRole::Client => &self.remote,
        }
    }

    fn rebase(&mut self, base: &Path) {
        for entry in self.local.iter_mut().chain(self.remote.iter_mut()) {
            if entry.path.is_relative() {
                entry.path = base.join(&entry.path);
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptingConfig {
    #[serde(default)]
    pub role: HostRole,
    #[serde(default = "ScriptingConfig::default_libraries")]
    pub libraries: Vec<String>,
    #[serde(default = "ScriptingConfig::default_max_players")]
    pub max_players: usize,
    #[serde(default)]
    pub max_operations: Option<u64>,
    #[serde(default)]
    pub hot_reload: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "ScriptingConfig::default_console_capacity")]
    pub console_capacity: usize,
    #[serde(default)]
    pub mods: ModTables,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptingConfigOverrides {
    pub role: Option<HostRole>,
    pub max_players: Option<usize>,
    pub hot_reload: Option<bool>,
}

impl ScriptingConfig {
    fn default_libraries() -> Vec<String> {
        ["core", "math", "string", "array", "map"].into_iter().map(str::to_string).collect()
    }

    const fn default_max_players() -> usize {
        DEFAULT_MAX_PLAYERS
    }

    const fn default_console_capacity() -> usize {
        DEFAULT_CONSOLE_CAPACITY
    }

    /// Loads a JSON config. Relative mod paths are resolved against the config file's directory and
    /// `max_players` above [`MAX_PLAYER_SLOTS`] is rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut cfg: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        if cfg.max_players > MAX_PLAYER_SLOTS {
            bail!(
                "Config file {} asks for {} players, the limit is {MAX_PLAYER_SLOTS}",
                path.display(),
                cfg.max_players
            );
        }
        if let Some(base) = path.parent() {
            cfg.mods.rebase(base);
        }
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ScriptingConfigOverrides) {
        if let Some(role) = overrides.role {
            self.role = role;
        }
        if let Some(max_players) = overrides.max_players {
            if max_players > MAX_PLAYER_SLOTS {
                warn!("--players {max_players} exceeds the slot limit, using {MAX_PLAYER_SLOTS}");
            }
            self.max_players = max_players.min(MAX_PLAYER_SLOTS);
        }
        if let Some(hot_reload) = overrides.hot_reload {
            self.hot_reload = hot_reload;
        }
    }

    /// The mod list this process loads, chosen by role.
    pub fn active_mods(&self) -> &[ModEntry] {
        self.mods.select(self.role)
    }
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            role: HostRole::default(),
            libraries: Self::default_libraries(),
            max_players: Self::default_max_players(),
            max_operations: None,
            hot_reload: false,
            seed: None,
            console_capacity: Self::default_console_capacity(),
            mods: ModTables::default(),
        }
    }
}

impl ScriptingConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.max_players.is_none() && self.hot_reload.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.role.is_some() {
            fields.push("role");
        }
        if self.max_players.is_some() {
            fields.push("max_players");
        }
        if self.hot_reload.is_some() {
            fields.push("hot_reload");
        }
        fields
    }
}
