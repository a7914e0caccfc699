use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Position, INT};
use tracing::{debug, error};

use crate::error::ScriptError;
use crate::events::HookKind;
use crate::namespace::ActiveScope;
use crate::sandbox::{UnitId, UnitTable};

#[derive(Debug, Clone)]
pub struct HookEntry {
    pub unit: UnitId,
    pub callback: FnPtr,
}

/// Ordered script callbacks per hook kind, plus the unit currently allowed to register.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: HashMap<HookKind, Vec<HookEntry>>,
    active: Option<UnitId>,
}

pub type SharedHooks = Rc<RefCell<HookRegistry>>;

impl HookRegistry {
    pub fn shared() -> SharedHooks {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Marks `unit` as the owner of registrations made from now on and returns the previous owner.
    pub fn set_active(&mut self, unit: Option<UnitId>) -> Option<UnitId> {
        std::mem::replace(&mut self.active, unit)
    }

    pub fn active(&self) -> Option<UnitId> {
        self.active
    }

    pub fn register(&mut self, kind: HookKind, callback: FnPtr) -> Result<(), String> {
        let unit = self.active.ok_or_else(|| "hook_event called outside of a loaded script".to_string())?;
        self.hooks.entry(kind).or_default().push(HookEntry { unit, callback });
        Ok(())
    }

    /// Copy of the callbacks for `kind` in registration order.
    pub fn snapshot(&self, kind: HookKind) -> Vec<HookEntry> {
        self.hooks.get(&kind).cloned().unwrap_or_default()
    }

    pub fn count(&self, kind: HookKind) -> usize {
        self.hooks.get(&kind).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.hooks.clear();
        self.active = None;
    }
}

/// Installs `hook_event(kind, callback)` for scripts.
pub fn register_hook_api(engine: &mut Engine, hooks: SharedHooks) {
    engine.register_fn("hook_event", move |kind: INT, callback: FnPtr| -> Result<(), Box<EvalAltResult>> {
        let kind = HookKind::from_id(kind).ok_or_else(|| runtime_error(format!("unknown hook kind {kind}")))?;
        hooks.borrow_mut().register(kind, callback).map_err(runtime_error)
    });
}

fn runtime_error(message: String) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failures: Vec<ScriptError>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failures.len()
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.invoked += other.invoked;
        self.failures.extend(other.failures);
    }
}

/// Runs every callback registered for one hook kind, against the unit that registered it.
pub struct HookDispatcher<'a> {
    pub engine: &'a Engine,
    pub units: &'a UnitTable,
    pub hooks: &'a SharedHooks,
    pub active: &'a ActiveScope,
}

impl HookDispatcher<'_> {
    /// Calls the callbacks for `kind` in registration order. Each failure is logged and recorded and
    /// the remaining callbacks still run. Registrations made by the callbacks apply from the next
    /// dispatch on.
    pub fn dispatch(&self, kind: HookKind, args: &[Dynamic]) -> DispatchReport {
        let entries = self.hooks.borrow().snapshot(kind);
        let mut report = DispatchReport::default();
        for entry in entries {
            let Some(unit) = self.units.get(entry.unit) else {
                debug!(target: "scripting", "Dropping {kind} hook for unloaded unit {:?}", entry.unit);
                continue;
            };
            report.invoked += 1;
            let previous = self.hooks.borrow_mut().set_active(Some(entry.unit));
            let previous_scope = self.active.enter(Some(unit.scope().clone()));
            let outcome = entry.callback.call::<Dynamic>(self.engine, unit.ast(), args.to_vec());
            self.active.enter(previous_scope);
            self.hooks.borrow_mut().set_active(previous);
            if let Err(err) = outcome {
                let failure = ScriptError::runtime(format!("{kind} hook of '{}'", unit.path().display()), &err);
                error!(target: "scripting", "{failure}");
                for frame in failure.stack() {
                    error!(target: "scripting", "    at {frame}");
                }
                report.failures.push(failure);
            }
        }
        report
    }
}
