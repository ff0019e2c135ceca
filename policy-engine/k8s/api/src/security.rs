pub mod authorization_policy;

pub use self::authorization_policy::{AuthorizationPolicy, AuthorizationPolicySpec};
