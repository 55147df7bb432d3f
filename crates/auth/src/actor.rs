use serde::{Deserialize, Serialize};

use depot_core::UserId;

use crate::Role;

/// The acting user attached to every mutating operation.
///
/// Both fields are opaque inputs supplied by the external auth subsystem;
/// the core never resolves or stores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}
