//! Two-level global environments for mod scripts.
//!
//! Every script unit owns a [`ScriptNamespace`]: a private scope seeded with copies of the
//! [`HostNamespace`] globals when the unit is created. Top-level code and closures read and write that
//! scope, so assigning to a host name defines the unit's own value and never touches the host copy.
//! Script functions (`fn`) cannot see the scope directly; the resolver installed by
//! [`install_resolver`] answers their lookups from the unit currently running, then from the host.
//! Names reached through the resolver are read-only.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use rhai::{Dynamic, Engine, Scope};

/// Globals provided by the host: constants, the player table and anything else seeded at startup.
#[derive(Debug, Clone, Default)]
pub struct HostNamespace {
    globals: Rc<RefCell<BTreeMap<String, Dynamic>>>,
}

impl HostNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, name: impl Into<String>, value: impl Into<Dynamic>) {
        self.globals.borrow_mut().insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<Dynamic> {
        self.globals.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.globals.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.globals.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies every variable of `scope` into the namespace, replacing existing entries.
    pub fn absorb(&self, scope: &Scope<'_>) {
        let mut globals = self.globals.borrow_mut();
        for (name, _, value) in scope.iter() {
            globals.insert(name.to_string(), value);
        }
    }

    /// Pushes a writable copy of every host global into `scope`, host constants included. Arrays of
    /// proxies are copied as handles, so field writes still reach native storage.
    fn seed(&self, scope: &mut Scope<'static>) {
        for (name, value) in self.globals.borrow().iter() {
            // `push` marks the entry writable; `push_dynamic` would keep a constant's access mode.
            scope.push(name.clone(), value.clone());
        }
    }
}

pub type SharedScope = Rc<RefCell<Scope<'static>>>;

pub struct ScriptNamespace {
    scope: SharedScope,
    host: HostNamespace,
}

impl ScriptNamespace {
    pub fn new(host: HostNamespace) -> Self {
        let mut scope = Scope::new();
        host.seed(&mut scope);
        Self { scope: Rc::new(RefCell::new(scope)), host }
    }

    pub fn lookup(&self, name: &str) -> Option<Dynamic> {
        let local = self.scope.try_borrow().ok().and_then(|scope| scope.get(name).map(Dynamic::flatten_clone));
        local.or_else(|| self.host.get(name))
    }

    pub(crate) fn scope(&self) -> &SharedScope {
        &self.scope
    }
}

/// The scope of the unit whose code is currently executing, if any.
#[derive(Clone, Default)]
pub struct ActiveScope {
    current: Rc<RefCell<Option<SharedScope>>>,
}

impl ActiveScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `scope` the active one and returns the previous value for the caller to restore.
    pub fn enter(&self, scope: Option<SharedScope>) -> Option<SharedScope> {
        self.current.replace(scope)
    }

    /// Reads `name` from the active scope. A scope that is mutably borrowed (its top level is still
    /// running) answers nothing.
    fn lookup(&self, name: &str) -> Option<Dynamic> {
        let current = self.current.borrow();
        let scope = current.as_ref()?.try_borrow().ok()?;
        scope.get(name).map(Dynamic::flatten_clone)
    }
}

/// Resolves names the running scope does not define: first from the active unit's scope, then from
/// `host`. Values found this way are read-only to the script.
pub fn install_resolver(engine: &mut Engine, host: HostNamespace, active: ActiveScope) {
    // rhai flags `on_var` as volatile API through the deprecation lint.
    #[allow(deprecated)]
    engine.on_var(move |name, index, context| {
        if index > 0 || context.scope().contains(name) {
            return Ok(None);
        }
        Ok(active.lookup(name).or_else(|| host.get(name)))
    });
}
