//! Re-exported types from external crates for convenience.
//!
//! These types appear in this SDK's public API and are re-exported here so users don't need to
//! add these dependencies to their `Cargo.toml`.

/// Signing service key type accepted by [`crate::config::Settings`].
pub use secrecy::SecretString;
/// Cancellation signal accepted by [`crate::live::Client::start`] and [`crate::live::Client::run`].
pub use tokio_util::sync::CancellationToken;
/// URL type used for hosts and the push server.
pub use url::Url;
