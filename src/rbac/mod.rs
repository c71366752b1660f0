pub mod cache;
pub mod engine;
pub mod key;

pub use engine::{Decision, check, list_permissions_for_user};
pub use key::PermissionKey;
