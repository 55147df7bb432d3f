//! `depot-auth` — pure authorization boundary.
//!
//! How roles are resolved (sessions, tokens, directories) is entirely
//! external; this crate only answers `can(role, action)` for an opaque
//! acting user.

pub mod actions;
pub mod actor;
pub mod policy;
pub mod roles;

pub use actions::Action;
pub use actor::Actor;
pub use policy::{Policy, TablePolicy, authorize, default_policy};
pub use roles::Role;
