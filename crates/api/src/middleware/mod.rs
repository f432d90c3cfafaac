//! Authentication and authorization extractors.
//!
//! - [`auth::AuthUser`] -- the caller, from a JWT Bearer token.
//! - [`rbac::RequireService`] -- requires the `service` or `admin` role.
//! - [`rbac::AuthorizedTarget`] -- the path target, owned by the caller.

pub mod auth;
pub mod rbac;
