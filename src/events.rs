use std::fmt;

use rhai::INT;

/// Simulation moments at which registered script callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookKind {
    /// Once per simulation frame. Callbacks take no arguments.
    Update,
    /// After a player's per-frame step. Callbacks receive the player proxy.
    PlayerUpdate,
    /// Before a player's per-frame step. Callbacks receive the player proxy.
    BeforePlayerUpdate,
}

impl HookKind {
    pub const ALL: [HookKind; 3] = [HookKind::Update, HookKind::PlayerUpdate, HookKind::BeforePlayerUpdate];

    pub fn id(self) -> INT {
        match self {
            HookKind::Update => 0,
            HookKind::PlayerUpdate => 1,
            HookKind::BeforePlayerUpdate => 2,
        }
    }

    pub fn from_id(id: INT) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Name of the script constant carrying [`HookKind::id`].
    pub fn constant_name(self) -> &'static str {
        match self {
            HookKind::Update => "HOOK_UPDATE",
            HookKind::PlayerUpdate => "HOOK_PLAYER_UPDATE",
            HookKind::BeforePlayerUpdate => "HOOK_BEFORE_PLAYER_UPDATE",
        }
    }

    pub fn takes_player(self) -> bool {
        !matches!(self, HookKind::Update)
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Update => f.write_str("update"),
            HookKind::PlayerUpdate => f.write_str("player_update"),
            HookKind::BeforePlayerUpdate => f.write_str("before_player_update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip() {
        for kind in HookKind::ALL {
            assert_eq!(HookKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(HookKind::from_id(99), None);
    }

    #[test]
    fn only_update_is_argument_free() {
        assert!(!HookKind::Update.takes_player());
        assert!(HookKind::PlayerUpdate.takes_player());
        assert_eq!(HookKind::BeforePlayerUpdate.to_string(), "before_player_update");
    }
}
