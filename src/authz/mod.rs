//! Hierarchical multi-tenant RBAC.
//!
//! Access to gym, team and class resources is decided per request from three
//! pieces: a role assigned per (user, gym, sport) scope, a fixed
//! role→permission catalog, and a linear role hierarchy for "at least this
//! role" checks. A single decision engine evaluates both policy styles;
//! the route guard adapts HTTP requests to it and annotates allowed requests
//! with the resolved role and scope.

mod catalog;
mod engine;
mod guard;
mod scope;

pub use catalog::{GymRole, Permission, RoleCatalog};
pub use engine::{AccessGrant, AccessPolicy, Authorizer};
pub use guard::{enforce, RouteAccess, ScopeStrategy};
pub use scope::{AuthzStore, Scope, ScopeRef, SqlAuthzStore};

pub(crate) use scope::parse_uuid;
