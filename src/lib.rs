pub mod bindings;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod namespace;
pub mod player;
pub mod proxy;
pub mod sandbox;
pub mod script_harness;
pub mod scripts;

pub use config::{HostRole, ModEntry, ScriptingConfig};
pub use error::ScriptError;
pub use events::HookKind;
pub use scripts::{InitReport, ScriptHost};
