//! Script-visible handles over host-owned native records.
//!
//! An [`ObjectProxy`] pairs a type tag with a non-owning reference into host storage. Every field
//! access goes through the fixed schema for that tag, re-resolves the native record and checks its
//! bounds, so a proxy that outlives its session or its slot fails loudly instead of reading freed
//! state.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Position, FLOAT, INT};
use thiserror::Error;

use crate::player::{PlayerState, PlayerTable};

/// Native structure kinds that may be exposed to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    PlayerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub writable: bool,
}

const fn field(name: &'static str, ty: FieldType, writable: bool) -> FieldSpec {
    FieldSpec { name, ty, writable }
}

const PLAYER_STATE_FIELDS: &[FieldSpec] = &[
    field("index", FieldType::Int, false),
    field("health", FieldType::Int, true),
    field("coins", FieldType::Int, true),
    field("lives", FieldType::Int, true),
    field("stars", FieldType::Int, true),
    field("action", FieldType::Int, true),
    field("flags", FieldType::Int, true),
    field("face_yaw", FieldType::Int, true),
    field("forward_vel", FieldType::Float, true),
    field("pos_x", FieldType::Float, true),
    field("pos_y", FieldType::Float, true),
    field("pos_z", FieldType::Float, true),
    field("vel_x", FieldType::Float, true),
    field("vel_y", FieldType::Float, true),
    field("vel_z", FieldType::Float, true),
];

impl ObjectKind {
    pub const ALL: [ObjectKind; 1] = [ObjectKind::PlayerState];

    pub fn type_name(self) -> &'static str {
        match self {
            ObjectKind::PlayerState => "PlayerState",
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            ObjectKind::PlayerState => PLAYER_STATE_FIELDS,
        }
    }

    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|spec| spec.name == name)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    #[error("{kind} proxy belongs to an interpreter session that no longer exists")]
    StaleSession { kind: ObjectKind },
    #[error("{kind} storage has been released by the host")]
    Released { kind: ObjectKind },
    #[error("{kind} storage is borrowed by the host")]
    Busy { kind: ObjectKind },
    #[error("{kind} slot {slot} is out of bounds (len {len})")]
    OutOfBounds { kind: ObjectKind, slot: usize, len: usize },
    #[error("{kind} has no field '{field}'")]
    UnknownField { kind: ObjectKind, field: String },
    #[error("{kind}.{field} is read-only")]
    ReadOnly { kind: ObjectKind, field: String },
    #[error("{field} expects {expected}, got {found}")]
    TypeMismatch { field: String, expected: &'static str, found: String },
    #[error("{field} cannot hold {value}")]
    OutOfRange { field: String, value: String },
    #[error("cannot wrap a {found} reference as {expected}")]
    KindMismatch { expected: ObjectKind, found: ObjectKind },
}

impl ProxyError {
    pub fn into_rhai(self) -> Box<EvalAltResult> {
        EvalAltResult::ErrorRuntime(self.to_string().into(), Position::NONE).into()
    }
}

/// Field value after the schema type check, before narrowing into the native width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Int(INT),
    Float(FLOAT),
}

impl FieldValue {
    fn from_dynamic(spec: &FieldSpec, value: &Dynamic) -> Result<Self, ProxyError> {
        let mismatch = |expected: &'static str| ProxyError::TypeMismatch {
            field: spec.name.to_string(),
            expected,
            found: value.type_name().to_string(),
        };
        match spec.ty {
            FieldType::Int => value.as_int().map(FieldValue::Int).map_err(|_| mismatch("an integer")),
            FieldType::Float => value
                .as_float()
                .or_else(|_| value.as_int().map(|v| v as FLOAT))
                .map(FieldValue::Float)
                .map_err(|_| mismatch("a number")),
        }
    }

    pub fn into_dynamic(self) -> Dynamic {
        match self {
            FieldValue::Int(v) => Dynamic::from_int(v),
            FieldValue::Float(v) => Dynamic::from_float(v),
        }
    }

    /// Converts an integer value into the native field width, rejecting values that do not fit.
    pub fn narrow<T: TryFrom<INT>>(self, field: &str) -> Result<T, ProxyError> {
        match self {
            FieldValue::Int(v) => {
                T::try_from(v).map_err(|_| ProxyError::OutOfRange { field: field.to_string(), value: v.to_string() })
            }
            FieldValue::Float(_) => Err(ProxyError::TypeMismatch {
                field: field.to_string(),
                expected: "an integer",
                found: "f64".to_string(),
            }),
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            FieldValue::Int(v) => v as f32,
            FieldValue::Float(v) => v as f32,
        }
    }
}

/// A native record type that has a schema registered under [`ObjectKind`].
pub trait NativeRecord {
    const KIND: ObjectKind;

    fn read_field(&self, field: &str) -> Option<FieldValue>;

    fn write_field(&mut self, field: &str, value: FieldValue) -> Result<(), ProxyError>;
}

/// Liveness marker for one interpreter session. Proxies keep a weak handle to it.
#[derive(Debug, Default)]
pub struct SessionToken(Rc<()>);

impl SessionToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn downgrade(&self) -> Weak<()> {
        Rc::downgrade(&self.0)
    }
}

/// Non-owning reference into host storage.
#[derive(Debug, Clone)]
pub enum NativeRef {
    Player { table: Weak<RefCell<Vec<PlayerState>>>, slot: usize },
}

impl NativeRef {
    pub fn player(table: &PlayerTable, slot: usize) -> Self {
        NativeRef::Player { table: table.downgrade(), slot }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            NativeRef::Player { .. } => ObjectKind::PlayerState,
        }
    }

    fn same_target(&self, other: &NativeRef) -> bool {
        match (self, other) {
            (NativeRef::Player { table: a, slot: sa }, NativeRef::Player { table: b, slot: sb }) => {
                sa == sb && Weak::ptr_eq(a, b)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObjectProxy {
    kind: ObjectKind,
    target: NativeRef,
    session: Weak<()>,
}

impl ObjectProxy {
    pub fn wrap(kind: ObjectKind, target: NativeRef, session: &SessionToken) -> Result<Self, ProxyError> {
        if target.kind() != kind {
            return Err(ProxyError::KindMismatch { expected: kind, found: target.kind() });
        }
        Ok(Self { kind, target, session: session.downgrade() })
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// True when both proxies view the same native record.
    pub fn same_target(&self, other: &ObjectProxy) -> bool {
        self.kind == other.kind && self.target.same_target(&other.target)
    }

    pub fn is_valid(&self) -> bool {
        self.with_record(|_| ()).is_ok()
    }

    pub fn get(&self, field: &str) -> Result<Dynamic, ProxyError> {
        let spec = self.spec(field)?;
        self.with_record(|record| record.read_field(spec.name))?
            .map(FieldValue::into_dynamic)
            .ok_or_else(|| self.unknown(field))
    }

    pub fn set(&self, field: &str, value: Dynamic) -> Result<(), ProxyError> {
        let spec = self.spec(field)?;
        if !spec.writable {
            return Err(ProxyError::ReadOnly { kind: self.kind, field: field.to_string() });
        }
        let value = FieldValue::from_dynamic(spec, &value)?;
        self.with_record_mut(|record| record.write_field(spec.name, value))?
    }

    fn spec(&self, field: &str) -> Result<&'static FieldSpec, ProxyError> {
        self.kind.field(field).ok_or_else(|| self.unknown(field))
    }

    fn unknown(&self, field: &str) -> ProxyError {
        ProxyError::UnknownField { kind: self.kind, field: field.to_string() }
    }

    fn check_session(&self) -> Result<(), ProxyError> {
        if self.session.strong_count() == 0 {
            return Err(ProxyError::StaleSession { kind: self.kind });
        }
        Ok(())
    }

    fn with_record<R>(&self, f: impl FnOnce(&dyn RecordView) -> R) -> Result<R, ProxyError> {
        self.check_session()?;
        match &self.target {
            NativeRef::Player { table, slot } => {
                let table = table.upgrade().ok_or(ProxyError::Released { kind: self.kind })?;
                let slots = table.try_borrow().map_err(|_| ProxyError::Busy { kind: self.kind })?;
                let record = slots
                    .get(*slot)
                    .ok_or(ProxyError::OutOfBounds { kind: self.kind, slot: *slot, len: slots.len() })?;
                Ok(f(record))
            }
        }
    }

    fn with_record_mut<R>(&self, f: impl FnOnce(&mut dyn RecordView) -> R) -> Result<R, ProxyError> {
        self.check_session()?;
        match &self.target {
            NativeRef::Player { table, slot } => {
                let table = table.upgrade().ok_or(ProxyError::Released { kind: self.kind })?;
                let mut slots = table.try_borrow_mut().map_err(|_| ProxyError::Busy { kind: self.kind })?;
                let len = slots.len();
                let record =
                    slots.get_mut(*slot).ok_or(ProxyError::OutOfBounds { kind: self.kind, slot: *slot, len })?;
                Ok(f(record))
            }
        }
    }
}

impl fmt::Display for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            NativeRef::Player { slot, .. } => write!(f, "{}[{}]", self.kind, slot),
        }
    }
}

/// Object-safe view over [`NativeRecord`] so one proxy type can serve every kind.
trait RecordView {
    fn read_field(&self, field: &str) -> Option<FieldValue>;
    fn write_field(&mut self, field: &str, value: FieldValue) -> Result<(), ProxyError>;
}

impl<T: NativeRecord> RecordView for T {
    fn read_field(&self, field: &str) -> Option<FieldValue> {
        NativeRecord::read_field(self, field)
    }

    fn write_field(&mut self, field: &str, value: FieldValue) -> Result<(), ProxyError> {
        NativeRecord::write_field(self, field, value)
    }
}

/// Registers the proxy type, one getter/setter pair per schema field, and a by-name indexer.
pub fn register_proxy_api(engine: &mut Engine) {
    engine.register_type_with_name::<ObjectProxy>("ObjectProxy");
    for kind in ObjectKind::ALL {
        for spec in kind.fields() {
            let name = spec.name;
            engine.register_get(name, move |proxy: &mut ObjectProxy| proxy.get(name).map_err(ProxyError::into_rhai));
            if spec.writable {
                engine.register_set(name, move |proxy: &mut ObjectProxy, value: Dynamic| {
                    proxy.set(name, value).map_err(ProxyError::into_rhai)
                });
            }
        }
    }
    engine.register_indexer_get(|proxy: &mut ObjectProxy, field: ImmutableString| {
        proxy.get(field.as_str()).map_err(ProxyError::into_rhai)
    });
    engine.register_indexer_set(|proxy: &mut ObjectProxy, field: ImmutableString, value: Dynamic| {
        proxy.set(field.as_str(), value).map_err(ProxyError::into_rhai)
    });
    engine.register_fn("is_valid", |proxy: &mut ObjectProxy| proxy.is_valid());
    engine.register_fn("kind", |proxy: &mut ObjectProxy| proxy.kind().type_name().to_string());
    engine.register_fn("to_string", |proxy: &mut ObjectProxy| proxy.to_string());
    engine.register_fn("to_debug", |proxy: &mut ObjectProxy| format!("{proxy:?}"));
    engine.register_fn("==", |a: &mut ObjectProxy, b: ObjectProxy| a.same_target(&b));
    engine.register_fn("!=", |a: &mut ObjectProxy, b: ObjectProxy| !a.same_target(&b));
}
