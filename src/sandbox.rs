use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rhai::{Dynamic, Engine, AST};
use tracing::error;

use crate::error::ScriptError;
use crate::hooks::SharedHooks;
use crate::namespace::{ActiveScope, HostNamespace, ScriptNamespace, SharedScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

impl UnitId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// One loaded script file and its private namespace.
pub struct ScriptUnit {
    id: UnitId,
    path: PathBuf,
    ast: AST,
    namespace: ScriptNamespace,
}

impl ScriptUnit {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    pub fn lookup(&self, name: &str) -> Option<Dynamic> {
        self.namespace.lookup(name)
    }

    pub(crate) fn scope(&self) -> &SharedScope {
        self.namespace.scope()
    }
}

/// Every unit of a session, addressable by id and by path.
#[derive(Default)]
pub struct UnitTable {
    units: Vec<ScriptUnit>,
    by_path: HashMap<PathBuf, UnitId>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: UnitId) -> Option<&ScriptUnit> {
        self.units.get(id.0)
    }

    pub fn find(&self, path: &Path) -> Option<&ScriptUnit> {
        self.by_path.get(path).and_then(|id| self.get(*id))
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.units.iter().map(|unit| unit.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    fn next_id(&self) -> UnitId {
        UnitId(self.units.len())
    }

    fn insert(&mut self, unit: ScriptUnit) -> UnitId {
        let id = unit.id;
        self.by_path.insert(unit.path.clone(), id);
        self.units.push(unit);
        id
    }
}

/// Compiles script files into isolated units and runs their top-level code.
pub struct SandboxLoader<'a> {
    pub engine: &'a Engine,
    pub host: &'a HostNamespace,
    pub hooks: &'a SharedHooks,
    pub active: &'a ActiveScope,
}

impl SandboxLoader<'_> {
    /// Loads `path` as a new unit.
    ///
    /// Compile failures leave the table untouched. A unit whose top-level code fails stays
    /// registered with whatever it defined or hooked before the failure.
    pub fn load(&self, units: &mut UnitTable, path: &Path) -> Result<UnitId, ScriptError> {
        if units.find(path).is_some() {
            return Err(ScriptError::Duplicate { path: path.to_path_buf() });
        }
        let source = fs::read_to_string(path).map_err(|err| ScriptError::compile(path, err))?;
        let mut ast = self.engine.compile(&source).map_err(|err| ScriptError::compile(path, err))?;
        ast.set_source(path.display().to_string());

        let id = units.insert(ScriptUnit {
            id: units.next_id(),
            path: path.to_path_buf(),
            ast,
            namespace: ScriptNamespace::new(self.host.clone()),
        });
        let unit = &units.units[id.0];
        let scope = unit.namespace.scope().clone();

        let previous = self.hooks.borrow_mut().set_active(Some(id));
        let previous_scope = self.active.enter(Some(scope.clone()));
        let outcome = self.engine.run_ast_with_scope(&mut scope.borrow_mut(), &unit.ast);
        self.active.enter(previous_scope);
        self.hooks.borrow_mut().set_active(previous);

        outcome.map(|_| id).map_err(|err| {
            let failure = ScriptError::runtime(format!("'{}'", path.display()), &err);
            error!(target: "scripting", "Failed to execute script '{}': {failure}", path.display());
            for frame in failure.stack() {
                error!(target: "scripting", "    at {frame}");
            }
            failure
        })
    }
}
