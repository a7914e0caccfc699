use std::cell::RefCell;
use std::rc::{Rc, Weak};

use glam::Vec3;
use rhai::{FLOAT, INT};
use tracing::warn;

use crate::proxy::{FieldValue, NativeRecord, ObjectKind, ProxyError};

/// Number of player slots the simulation keeps when the config does not say otherwise.
pub const DEFAULT_MAX_PLAYERS: usize = 16;

/// Slot indices are stored as `u8`, which bounds the table size.
pub const MAX_PLAYER_SLOTS: usize = u8::MAX as usize + 1;

fn capped_slot_count(count: usize) -> usize {
    if count > MAX_PLAYER_SLOTS {
        warn!(target: "scripting", "Requested {count} player slots, capping at {MAX_PLAYER_SLOTS}");
    }
    count.min(MAX_PLAYER_SLOTS)
}

/// Per-player simulation record owned by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub index: u8,
    pub health: i16,
    pub coins: i16,
    pub lives: i8,
    pub stars: i16,
    pub action: u32,
    pub flags: u32,
    pub face_yaw: i16,
    pub forward_vel: f32,
    pub pos: Vec3,
    pub vel: Vec3,
}

impl PlayerState {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            health: 8,
            coins: 0,
            lives: 4,
            stars: 0,
            action: 0,
            flags: 0,
            face_yaw: 0,
            forward_vel: 0.0,
            pos: Vec3::ZERO,
            vel: Vec3::ZERO,
        }
    }
}

impl NativeRecord for PlayerState {
    const KIND: ObjectKind = ObjectKind::PlayerState;

    fn read_field(&self, field: &str) -> Option<FieldValue> {
        let value = match field {
            "index" => FieldValue::Int(self.index as INT),
            "health" => FieldValue::Int(self.health as INT),
            "coins" => FieldValue::Int(self.coins as INT),
            "lives" => FieldValue::Int(self.lives as INT),
            "stars" => FieldValue::Int(self.stars as INT),
            "action" => FieldValue::Int(self.action as INT),
            "flags" => FieldValue::Int(self.flags as INT),
            "face_yaw" => FieldValue::Int(self.face_yaw as INT),
            "forward_vel" => FieldValue::Float(self.forward_vel as FLOAT),
            "pos_x" => FieldValue::Float(self.pos.x as FLOAT),
            "pos_y" => FieldValue::Float(self.pos.y as FLOAT),
            "pos_z" => FieldValue::Float(self.pos.z as FLOAT),
            "vel_x" => FieldValue::Float(self.vel.x as FLOAT),
            "vel_y" => FieldValue::Float(self.vel.y as FLOAT),
            "vel_z" => FieldValue::Float(self.vel.z as FLOAT),
            _ => return None,
        };
        Some(value)
    }

    fn write_field(&mut self, field: &str, value: FieldValue) -> Result<(), ProxyError> {
        match field {
            "health" => self.health = value.narrow(field)?,
            "coins" => self.coins = value.narrow(field)?,
            "lives" => self.lives = value.narrow(field)?,
            "stars" => self.stars = value.narrow(field)?,
            "action" => self.action = value.narrow(field)?,
            "flags" => self.flags = value.narrow(field)?,
            "face_yaw" => self.face_yaw = value.narrow(field)?,
            "forward_vel" => self.forward_vel = value.as_f32(),
            "pos_x" => self.pos.x = value.as_f32(),
            "pos_y" => self.pos.y = value.as_f32(),
            "pos_z" => self.pos.z = value.as_f32(),
            "vel_x" => self.vel.x = value.as_f32(),
            "vel_y" => self.vel.y = value.as_f32(),
            "vel_z" => self.vel.z = value.as_f32(),
            _ => return Err(ProxyError::ReadOnly { kind: Self::KIND, field: field.to_string() }),
        }
        Ok(())
    }
}

/// Host-owned storage for every player slot.
///
/// Scripts never own this memory; proxies hold a [`Weak`] handle obtained from [`PlayerTable::downgrade`]
/// and re-check the slot bounds on every access.
#[derive(Debug, Clone, Default)]
pub struct PlayerTable {
    slots: Rc<RefCell<Vec<PlayerState>>>,
}

impl PlayerTable {
    pub fn new(count: usize) -> Self {
        let count = capped_slot_count(count);
        let slots = (0..count).map(|idx| PlayerState::new(idx as u8)).collect();
        Self { slots: Rc::new(RefCell::new(slots)) }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, slot: usize) -> Option<PlayerState> {
        self.slots.borrow().get(slot).cloned()
    }

    pub fn with_player_mut<R>(&self, slot: usize, f: impl FnOnce(&mut PlayerState) -> R) -> Option<R> {
        self.slots.borrow_mut().get_mut(slot).map(f)
    }

    pub fn snapshot(&self) -> Vec<PlayerState> {
        self.slots.borrow().clone()
    }

    /// Shrinks or grows the table. Proxies for removed slots start failing their bounds check.
    pub fn resize(&self, count: usize) {
        let count = capped_slot_count(count);
        let mut slots = self.slots.borrow_mut();
        let current = slots.len();
        if count < current {
            slots.truncate(count);
        } else {
            slots.extend((current..count).map(|idx| PlayerState::new(idx as u8)));
        }
    }

    pub fn downgrade(&self) -> Weak<RefCell<Vec<PlayerState>>> {
        Rc::downgrade(&self.slots)
    }
}
