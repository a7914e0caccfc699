//! Native functions exposed to scripts.
//!
//! Two sources feed the global function namespace: the host API installed by every session
//! ([`HostApi`]) and a [`BindingTable`] handed in by the embedding engine. The table is treated as
//! opaque data: each entry is a name, an arity and a callable over dynamic values.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rhai::{Dynamic, Engine, EvalAltResult, Position, FLOAT, INT};
use tracing::{debug, info};

use crate::config::HostRole;
use crate::console::{ConsoleKind, ScriptConsole};
use crate::error::ScriptError;

/// Function names owned by the host API. Table entries may not reuse them.
pub const HOST_FUNCTIONS: &[&str] = &["hook_event", "log", "random_range", "is_server"];

pub const MAX_BINDING_ARITY: usize = 4;

pub type NativeFn = Rc<dyn Fn(&[Dynamic]) -> Result<Dynamic, String>>;

#[derive(Clone)]
pub struct NativeBinding {
    name: String,
    arity: usize,
    func: NativeFn,
}

impl NativeBinding {
    pub fn new(
        name: impl Into<String>,
        arity: usize,
        func: impl Fn(&[Dynamic]) -> Result<Dynamic, String> + 'static,
    ) -> Self {
        Self { name: name.into(), arity, func: Rc::new(func) }
    }

    pub fn call(&self, args: &[Dynamic]) -> Result<Dynamic, String> {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBinding").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: Vec<NativeBinding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, binding: NativeBinding) -> Self {
        self.entries.push(binding);
        self
    }

    pub fn push(&mut self, binding: NativeBinding) {
        self.entries.push(binding);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks every entry before registering any of them, so a bad table installs nothing.
    pub fn install(&self, engine: &mut Engine) -> Result<usize, ScriptError> {
        let mut seen = HashSet::new();
        for binding in &self.entries {
            if !is_identifier(&binding.name) {
                return Err(ScriptError::setup(format!("binding name '{}' is not a valid identifier", binding.name)));
            }
            if HOST_FUNCTIONS.contains(&binding.name.as_str()) {
                return Err(ScriptError::setup(format!("binding '{}' shadows a host function", binding.name)));
            }
            if !seen.insert(binding.name.as_str()) {
                return Err(ScriptError::setup(format!("binding '{}' is declared twice", binding.name)));
            }
            if binding.arity > MAX_BINDING_ARITY {
                return Err(ScriptError::setup(format!(
                    "binding '{}' takes {} arguments; at most {MAX_BINDING_ARITY} are supported",
                    binding.name, binding.arity
                )));
            }
        }
        for binding in &self.entries {
            register_binding(engine, binding);
        }
        debug!(target: "scripting", "Installed {} native binding(s)", self.entries.len());
        Ok(self.entries.len())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn register_binding(engine: &mut Engine, binding: &NativeBinding) {
    let name = binding.name.clone();
    let native = binding.clone();
    let call = move |args: &[Dynamic]| native.call(args).map_err(runtime_error);
    match binding.arity {
        0 => {
            engine.register_fn(name, move || call(&[]));
        }
        1 => {
            engine.register_fn(name, move |a: Dynamic| call(&[a]));
        }
        2 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic| call(&[a, b]));
        }
        3 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| call(&[a, b, c]));
        }
        _ => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| call(&[a, b, c, d]));
        }
    }
}

fn runtime_error(message: String) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

/// Functions every session provides regardless of the binding table.
pub struct HostApi {
    pub console: ScriptConsole,
    pub role: HostRole,
    pub rng: Rc<RefCell<StdRng>>,
}

impl HostApi {
    pub fn new(console: ScriptConsole, role: HostRole, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { console, role, rng: Rc::new(RefCell::new(rng)) }
    }

    pub fn install(&self, engine: &mut Engine) {
        let console = self.console.clone();
        engine.on_print(move |text| {
            info!(target: "scripting", "[script] {text}");
            console.push(ConsoleKind::Output, text);
        });
        let console = self.console.clone();
        engine.on_debug(move |text, source, pos| {
            let line = match source {
                Some(source) => format!("{source} @ {pos}: {text}"),
                None => format!("{pos}: {text}"),
            };
            debug!(target: "scripting", "[script] {line}");
            console.push(ConsoleKind::Debug, line);
        });

        let console = self.console.clone();
        engine.register_fn("log", move |message: Dynamic| {
            let text = message.to_string();
            info!(target: "scripting", "[script] {text}");
            console.push(ConsoleKind::Output, text);
        });

        let rng = self.rng.clone();
        engine.register_fn("random_range", move |min: FLOAT, max: FLOAT| -> FLOAT {
            if min >= max {
                return min;
            }
            rng.borrow_mut().gen_range(min..max)
        });
        let rng = self.rng.clone();
        engine.register_fn("random_range", move |min: INT, max: INT| -> INT {
            if min >= max {
                return min;
            }
            rng.borrow_mut().gen_range(min..max)
        });

        let is_server = self.role == HostRole::Server;
        engine.register_fn("is_server", move || is_server);
    }
}

fn number(args: &[Dynamic], index: usize) -> Result<f32, String> {
    let value = args.get(index).ok_or_else(|| format!("missing argument {index}"))?;
    value
        .as_float()
        .map(|v| v as f32)
        .or_else(|_| value.as_int().map(|v| v as f32))
        .map_err(|found| format!("argument {index} expects a number, got {found}"))
}

fn integer(args: &[Dynamic], index: usize) -> Result<INT, String> {
    let value = args.get(index).ok_or_else(|| format!("missing argument {index}"))?;
    value.as_int().map_err(|found| format!("argument {index} expects an integer, got {found}"))
}

/// Angle units used by the engine: a full turn is 0x10000.
const ANGLE_TO_RADIANS: f32 = std::f32::consts::TAU / 65_536.0;

/// Engine helpers shipped with the stock host.
pub fn default_table() -> BindingTable {
    BindingTable::new()
        .with(NativeBinding::new("approach_f32", 4, |args| {
            let (current, target) = (number(args, 0)?, number(args, 1)?);
            let (inc, dec) = (number(args, 2)?, number(args, 3)?);
            let next = if current < target { (current + inc).min(target) } else { (current - dec).max(target) };
            Ok(Dynamic::from_float(next as FLOAT))
        }))
        .with(NativeBinding::new("approach_s32", 4, |args| {
            let (current, target) = (integer(args, 0)?, integer(args, 1)?);
            let (inc, dec) = (integer(args, 2)?, integer(args, 3)?);
            let next = if current < target {
                current.saturating_add(inc).min(target)
            } else {
                current.saturating_sub(dec).max(target)
            };
            Ok(Dynamic::from_int(next))
        }))
        .with(NativeBinding::new("sins", 1, |args| {
            let angle = integer(args, 0)? as i16 as f32 * ANGLE_TO_RADIANS;
            Ok(Dynamic::from_float(angle.sin() as FLOAT))
        }))
        .with(NativeBinding::new("coss", 1, |args| {
            let angle = integer(args, 0)? as i16 as f32 * ANGLE_TO_RADIANS;
            Ok(Dynamic::from_float(angle.cos() as FLOAT))
        }))
        .with(NativeBinding::new("atan2s", 2, |args| {
            let (y, x) = (number(args, 0)?, number(args, 1)?);
            let turns = y.atan2(x) / ANGLE_TO_RADIANS;
            Ok(Dynamic::from_int(turns.round() as i32 as i16 as INT))
        }))
        .with(NativeBinding::new("vec3f_length", 3, |args| {
            let v = Vec3::new(number(args, 0)?, number(args, 1)?, number(args, 2)?);
            Ok(Dynamic::from_float(v.length() as FLOAT))
        }))
}
