//! Interpreter lifecycle: one [`ScriptHost`] owns at most one live scripting session at a time.

use std::fmt::Write as _;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, MoreStringPackage, Package,
};
use rhai::{Array, Dynamic, Engine, Scope};
use tracing::{debug, error, info, warn};

use crate::bindings::{default_table, BindingTable, HostApi};
use crate::config::ScriptingConfig;
use crate::console::ScriptConsole;
use crate::error::ScriptError;
use crate::events::HookKind;
use crate::hooks::{register_hook_api, DispatchReport, HookDispatcher, HookRegistry, SharedHooks};
use crate::namespace::{install_resolver, ActiveScope, HostNamespace};
use crate::player::PlayerTable;
use crate::proxy::{register_proxy_api, NativeRef, ObjectKind, ObjectProxy, SessionToken};
use crate::sandbox::{SandboxLoader, UnitTable};

/// Host global holding one proxy per player slot.
pub const PLAYER_STATES_GLOBAL: &str = "gPlayerStates";

/// Libraries mod scripts may request.
pub const ALLOWED_LIBRARIES: &[&str] = &["core", "math", "string", "array", "map"];

/// Libraries that are never installed, even when requested.
pub const WITHHELD_LIBRARIES: &[&str] = &["io", "fs", "os", "process", "module", "package", "debug", "time"];

const HOST_CONSTANTS: &str = include_str!("constants.rhai");

/// Outcome of one [`ScriptHost::initialize`] call.
#[derive(Debug, Default)]
pub struct InitReport {
    /// Enabled entries, in mod-table order.
    pub attempted: Vec<PathBuf>,
    pub loaded: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<ScriptError>,
    pub setup_error: Option<ScriptError>,
}

impl InitReport {
    pub fn is_active(&self) -> bool {
        self.setup_error.is_none()
    }
}

struct ScriptSession {
    engine: Engine,
    host: HostNamespace,
    units: UnitTable,
    hooks: SharedHooks,
    active: ActiveScope,
    // Dropped with the session, which invalidates every proxy handed out during it.
    token: SessionToken,
}

pub struct ScriptHost {
    config: ScriptingConfig,
    players: PlayerTable,
    bindings: BindingTable,
    console: ScriptConsole,
    session: Option<ScriptSession>,
    failures: Vec<ScriptError>,
    watched: Vec<(PathBuf, Option<SystemTime>)>,
}

impl ScriptHost {
    pub fn new(config: ScriptingConfig) -> Self {
        Self {
            players: PlayerTable::new(config.max_players),
            console: ScriptConsole::new(config.console_capacity),
            bindings: default_table(),
            config,
            session: None,
            failures: Vec::new(),
            watched: Vec::new(),
        }
    }

    /// Replaces the native binding table. Takes effect at the next [`ScriptHost::initialize`].
    pub fn with_bindings(mut self, bindings: BindingTable) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ScriptingConfig {
        &mut self.config
    }

    pub fn players(&self) -> &PlayerTable {
        &self.players
    }

    pub fn console(&self) -> &ScriptConsole {
        &self.console
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Tears down any live session, builds a fresh interpreter and loads every enabled script of
    /// the mod table selected by the configured role.
    ///
    /// A setup failure leaves the host inactive. Script failures are logged and recorded, and the
    /// remaining scripts are still loaded.
    pub fn initialize(&mut self) -> InitReport {
        self.shutdown();
        let mut report = InitReport::default();
        self.players.resize(self.config.max_players);

        let mut session = match self.build_session() {
            Ok(session) => session,
            Err(err) => {
                error!(target: "scripting", "Failed to initialize scripting: {err}");
                self.failures.push(err.clone());
                report.setup_error = Some(err);
                return report;
            }
        };

        let mods = self.config.active_mods().to_vec();
        info!(target: "scripting", "Loading scripts ({} role):", self.config.role.label());
        let loader = SandboxLoader {
            engine: &session.engine,
            host: &session.host,
            hooks: &session.hooks,
            active: &session.active,
        };
        for entry in mods {
            if !entry.enabled {
                debug!(target: "scripting", "    skipping disabled script {}", entry.path.display());
                report.skipped.push(entry.path);
                continue;
            }
            info!(target: "scripting", "    {}", entry.path.display());
            self.watched.push((entry.path.clone(), modified_time(&entry.path)));
            report.attempted.push(entry.path.clone());
            match loader.load(&mut session.units, &entry.path) {
                Ok(_) => report.loaded.push(entry.path),
                Err(err) => {
                    match &err {
                        ScriptError::Duplicate { .. } => warn!(target: "scripting", "{err}"),
                        // Runtime failures are reported by the loader together with their stack.
                        ScriptError::Runtime { .. } => {}
                        _ => error!(target: "scripting", "{err}"),
                    }
                    self.failures.push(err.clone());
                    report.failures.push(err);
                }
            }
        }
        info!(
            target: "scripting",
            "Loaded {}/{} script(s), {} hook(s) registered",
            report.loaded.len(),
            report.attempted.len(),
            session.hooks.borrow().total()
        );
        self.session = Some(session);
        report
    }

    fn build_session(&self) -> Result<ScriptSession, ScriptError> {
        let mut engine = Engine::new_raw();
        engine.set_fast_operators(true);
        engine.disable_symbol("eval");
        engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
        if let Some(limit) = self.config.max_operations {
            engine.set_max_operations(limit);
        }
        install_libraries(&mut engine, &self.config.libraries)?;

        let host = HostNamespace::new();
        let active = ActiveScope::new();
        install_resolver(&mut engine, host.clone(), active.clone());
        HostApi::new(self.console.clone(), self.config.role, self.config.seed).install(&mut engine);
        let hooks = HookRegistry::shared();
        register_hook_api(&mut engine, hooks.clone());
        register_proxy_api(&mut engine);
        self.bindings.install(&mut engine)?;

        seed_constants(&engine, &host, self.players.len())?;
        let token = SessionToken::new();
        publish_players(&host, &self.players, &token)?;
        debug!(target: "scripting", "Host namespace seeded with {} global(s)", host.len());

        Ok(ScriptSession { engine, host, units: UnitTable::new(), hooks, active, token })
    }

    /// Drops the live session, if any. Every hook registration and proxy of that session dies with it.
    pub fn shutdown(&mut self) {
        self.watched.clear();
        if let Some(session) = self.session.take() {
            session.hooks.borrow_mut().clear();
            info!(target: "scripting", "Scripting session shut down ({} script(s))", session.units.len());
        }
    }

    /// Per-frame entry point. Runs the update hooks; does nothing without a live session.
    pub fn tick(&mut self) -> DispatchReport {
        self.dispatch(HookKind::Update)
    }

    /// Runs the callbacks for `kind`. Player hooks run once per player slot.
    pub fn dispatch(&mut self, kind: HookKind) -> DispatchReport {
        if !kind.takes_player() {
            return self.run_hooks(kind, &[]);
        }
        let mut report = DispatchReport::default();
        for slot in 0..self.players.len() {
            report.merge(self.dispatch_player(kind, slot));
        }
        report
    }

    /// One simulation frame: before-player hooks, player hooks, then the update hooks.
    pub fn run_frame(&mut self) -> DispatchReport {
        let mut report = self.dispatch(HookKind::BeforePlayerUpdate);
        report.merge(self.dispatch(HookKind::PlayerUpdate));
        report.merge(self.tick());
        report
    }

    /// Runs the callbacks for a player hook with a proxy of `slot` as the only argument.
    pub fn dispatch_player(&mut self, kind: HookKind, slot: usize) -> DispatchReport {
        if !kind.takes_player() {
            return self.run_hooks(kind, &[]);
        }
        let Some(session) = self.session.as_ref() else {
            return DispatchReport::default();
        };
        if slot >= self.players.len() {
            let len = self.players.len();
            warn!(target: "scripting", "Ignoring {kind} dispatch for player slot {slot} (table has {len})");
            return DispatchReport::default();
        }
        let target = NativeRef::player(&self.players, slot);
        let proxy = match ObjectProxy::wrap(ObjectKind::PlayerState, target, &session.token) {
            Ok(proxy) => proxy,
            Err(err) => {
                warn!(target: "scripting", "Cannot expose player slot {slot}: {err}");
                return DispatchReport::default();
            }
        };
        self.run_hooks(kind, &[Dynamic::from(proxy)])
    }

    fn run_hooks(&mut self, kind: HookKind, args: &[Dynamic]) -> DispatchReport {
        let Some(session) = self.session.as_ref() else {
            return DispatchReport::default();
        };
        let dispatcher = HookDispatcher {
            engine: &session.engine,
            units: &session.units,
            hooks: &session.hooks,
            active: &session.active,
        };
        let report = dispatcher.dispatch(kind, args);
        self.failures.extend(report.failures.iter().cloned());
        report
    }

    /// Re-initializes when any attempted script changed on disk since it was loaded.
    pub fn reload_if_changed(&mut self) -> bool {
        let changed =
            self.watched.iter().find(|(path, seen)| modified_time(path) != *seen).map(|(path, _)| path.clone());
        match changed {
            Some(path) => {
                info!(target: "scripting", "Detected change in {}, reloading scripts", path.display());
                self.initialize();
                true
            }
            None => false,
        }
    }

    pub fn hook_count(&self, kind: HookKind) -> usize {
        self.session.as_ref().map_or(0, |session| session.hooks.borrow().count(kind))
    }

    /// Paths of the units in the live session, in load order. Includes units whose top-level code
    /// failed part way.
    pub fn loaded_scripts(&self) -> Vec<PathBuf> {
        self.session.as_ref().map(|session| session.units.paths()).unwrap_or_default()
    }

    /// Resolves `name` the way code in the script at `path` would.
    pub fn script_global(&self, path: &Path, name: &str) -> Option<Dynamic> {
        self.session.as_ref()?.units.find(path)?.lookup(name)
    }

    pub fn host_global(&self, name: &str) -> Option<Dynamic> {
        self.session.as_ref()?.host.get(name)
    }

    /// Script output produced since the last call.
    pub fn take_logs(&self) -> Vec<String> {
        self.console.take_lines()
    }

    /// Every failure recorded since the last call, oldest first.
    pub fn take_failures(&mut self) -> Vec<ScriptError> {
        mem::take(&mut self.failures)
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn install_libraries(engine: &mut Engine, names: &[String]) -> Result<(), ScriptError> {
    for name in names {
        match name.as_str() {
            "core" => {
                CorePackage::new().register_into_engine(engine);
            }
            "math" => {
                BasicMathPackage::new().register_into_engine(engine);
            }
            "string" => {
                MoreStringPackage::new().register_into_engine(engine);
            }
            "array" => {
                BasicArrayPackage::new().register_into_engine(engine);
            }
            "map" => {
                BasicMapPackage::new().register_into_engine(engine);
            }
            other if WITHHELD_LIBRARIES.contains(&other) => {
                return Err(ScriptError::setup(format!("library '{other}' is not available to mod scripts")));
            }
            other => {
                return Err(ScriptError::setup(format!(
                    "unknown library '{other}' (available: {})",
                    ALLOWED_LIBRARIES.join(", ")
                )));
            }
        }
    }
    Ok(())
}

fn constants_source(max_players: usize) -> String {
    let mut source = String::new();
    for kind in HookKind::ALL {
        let _ = writeln!(source, "const {} = {};", kind.constant_name(), kind.id());
    }
    let _ = writeln!(source, "const MAX_PLAYERS = {max_players};");
    source.push_str(HOST_CONSTANTS);
    source
}

fn seed_constants(engine: &Engine, host: &HostNamespace, max_players: usize) -> Result<(), ScriptError> {
    let mut scope = Scope::new();
    engine
        .run_with_scope(&mut scope, &constants_source(max_players))
        .map_err(|err| ScriptError::setup(format!("host constants failed to evaluate: {err}")))?;
    host.absorb(&scope);
    Ok(())
}

fn publish_players(host: &HostNamespace, players: &PlayerTable, token: &SessionToken) -> Result<(), ScriptError> {
    let mut array = Array::with_capacity(players.len());
    for slot in 0..players.len() {
        let proxy = ObjectProxy::wrap(ObjectKind::PlayerState, NativeRef::player(players, slot), token)
            .map_err(|err| ScriptError::setup(format!("cannot expose player slot {slot}: {err}")))?;
        array.push(Dynamic::from(proxy));
    }
    host.define(PLAYER_STATES_GLOBAL, array);
    Ok(())
}
