//! Role-to-action capability table (pure policy check).

use std::collections::{HashMap, HashSet};

use depot_core::{DomainError, DomainResult};

use crate::{Action, Actor, Role};

/// Capability interface: may `role` perform `action`?
///
/// Implementations are pure lookups; they are injected into the services
/// rather than hard-coded so deployments can supply their own tables.
pub trait Policy: Send + Sync {
    fn allows(&self, role: &Role, action: &Action) -> bool;
}

/// Policy backed by an explicit role → actions table.
#[derive(Debug, Clone, Default)]
pub struct TablePolicy {
    grants: HashMap<Role, HashSet<Action>>,
}

impl TablePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, role: Role, actions: impl IntoIterator<Item = Action>) -> Self {
        self.grants.entry(role).or_default().extend(actions);
        self
    }
}

impl Policy for TablePolicy {
    fn allows(&self, role: &Role, action: &Action) -> bool {
        match self.grants.get(role) {
            Some(actions) => {
                actions.contains(action) || actions.iter().any(|a| a.is_wildcard())
            }
            None => false,
        }
    }
}

/// Authorize an actor for an action.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(policy: &dyn Policy, actor: &Actor, action: &Action) -> DomainResult<()> {
    if policy.allows(&actor.role, action) {
        Ok(())
    } else {
        Err(DomainError::Unauthorized)
    }
}

/// The standard depot role table.
///
/// Deployments may replace this wholesale; nothing in the services depends
/// on these specific roles.
pub fn default_policy() -> TablePolicy {
    use crate::actions::well_known as act;

    TablePolicy::new()
        .grant(
            Role::new("storekeeper"),
            [act::submit(), act::issue(), act::receive_stock()],
        )
        .grant(
            Role::new("officer"),
            [
                act::submit(),
                act::approve(),
                act::issue(),
                act::cancel(),
                act::receive_stock(),
                act::custody_issue(),
                act::custody_update(),
            ],
        )
        .grant(
            Role::new("commander"),
            [
                act::approve(),
                act::commander_approve(),
                act::cancel(),
                act::adjust_thresholds(),
            ],
        )
        .grant(Role::new("admin"), [Action::new("*")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::well_known as act;

    fn actor(role: &'static str) -> Actor {
        Actor::new(depot_core::UserId::new(), Role::new(role))
    }

    #[test]
    fn officer_may_approve_but_not_commander_approve() {
        let policy = default_policy();
        let officer = actor("officer");

        assert!(authorize(&policy, &officer, &act::approve()).is_ok());
        assert_eq!(
            authorize(&policy, &officer, &act::commander_approve()),
            Err(DomainError::Unauthorized)
        );
    }

    #[test]
    fn commander_approval_is_a_distinct_grant() {
        let policy = default_policy();
        let commander = actor("commander");

        assert!(authorize(&policy, &commander, &act::commander_approve()).is_ok());
    }

    #[test]
    fn wildcard_grants_everything() {
        let policy = default_policy();
        let admin = actor("admin");

        assert!(authorize(&policy, &admin, &act::custody_issue()).is_ok());
        assert!(authorize(&policy, &admin, &Action::new("anything.else")).is_ok());
    }

    #[test]
    fn unknown_role_is_denied() {
        let policy = default_policy();
        let visitor = actor("visitor");

        assert_eq!(
            authorize(&policy, &visitor, &act::submit()),
            Err(DomainError::Unauthorized)
        );
    }
}
