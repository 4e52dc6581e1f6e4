//! Desktop sign-in through the system browser with a loopback redirect,
//! plus background renewal of the resulting access token.

pub mod auth;
pub mod config;
mod sync_ext;
#[cfg(test)]
mod test_support;

pub use auth::{AuthError, LoginOrchestrator};
pub use config::{AuthConfig, ConfigError, ConfigLocator};
