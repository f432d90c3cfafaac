pub mod jwt;

/// Full access to every target.
pub const ROLE_ADMIN: &str = "admin";

/// Host application backend allowed to call `notify`.
pub const ROLE_SERVICE: &str = "service";

/// A target acting on its own notifications and subscriptions.
pub const ROLE_TARGET: &str = "target";
