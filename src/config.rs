//! Client settings and their normalization.
//!
//! [`Settings`] is assembled with a builder where every field has a default. Explicit zero,
//! empty or undersized values are still accepted by the builder and then replaced by
//! [`Settings::normalize`], which the live client runs exactly once before first use.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use bon::Builder;
use secrecy::SecretString;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_CLIENT_LANGUAGE: &str = "en-US";
/// Socket buffers smaller than this are replaced by [`DEFAULT_SOCKET_BUFFER_SIZE`].
pub const MIN_SOCKET_BUFFER_SIZE: usize = 500_000;
pub const DEFAULT_SOCKET_BUFFER_SIZE: usize = 500_000;

pub const DEFAULT_WEB_HOST: &str = "https://www.tiktok.com/";
pub const DEFAULT_WEBCAST_HOST: &str = "https://webcast.tiktok.com/webcast/";
pub const DEFAULT_SIGNING_SERVER_URL: &str = "https://tiktok.eulerstream.com/webcast/fetch";

/// Verbosity classes a [`Settings`] can enable independently.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
pub enum LogLevel {
    Error,
    Warning,
    Information,
    Verbose,
}

fn default_log_levels() -> BTreeSet<LogLevel> {
    BTreeSet::from([LogLevel::Error, LogLevel::Warning])
}

/// Configuration for [`crate::live::Client`] and [`crate::webcast::Client`].
#[derive(Clone, Debug, Builder)]
pub struct Settings {
    /// Timeout applied to every HTTP request
    #[builder(default = DEFAULT_TIMEOUT)]
    pub(crate) timeout: Duration,
    /// Delay between attempts when a retrying `start` fails to open the socket
    #[builder(default = DEFAULT_RECONNECT_INTERVAL)]
    pub(crate) reconnect_interval: Duration,
    /// How often the keep-alive loop checks the socket and sends a ping
    #[builder(default = DEFAULT_POLLING_INTERVAL)]
    pub(crate) polling_interval: Duration,
    /// Read buffer for the push socket, in bytes
    #[builder(default = DEFAULT_SOCKET_BUFFER_SIZE)]
    pub(crate) socket_buffer_size: usize,
    /// ISO language tag sent as `app_language`, `webcast_language` and `Accept-Language`
    #[builder(into, default = DEFAULT_CLIENT_LANGUAGE.to_owned())]
    pub(crate) client_language: String,
    /// Ask for compressed HTTP responses
    #[builder(default = true)]
    pub(crate) enable_compression: bool,
    /// Proxy URL for HTTP requests
    #[builder(into)]
    pub(crate) proxy: Option<String>,
    /// Skip fetching room info (and so the "live ended" check)
    #[builder(default)]
    pub(crate) skip_room_info: bool,
    /// Hand the initial response returned by the signing service to the message handler
    #[builder(default = true)]
    pub(crate) handle_initial_messages: bool,
    /// Download the gift catalog on connect
    #[builder(default = true)]
    pub(crate) download_gift_info: bool,
    /// Override for the signing service endpoint
    #[builder(into, default = DEFAULT_SIGNING_SERVER_URL.to_owned())]
    pub(crate) signing_server_url: String,
    /// API key for the signing service
    pub(crate) signing_key: Option<SecretString>,
    /// Extra query parameters applied over the built-in defaults
    #[builder(default)]
    pub(crate) params: BTreeMap<String, String>,
    /// Enabled log levels
    #[builder(default = default_log_levels())]
    pub(crate) log_levels: BTreeSet<LogLevel>,
    /// Master switch for the client's own log output
    #[builder(default = true)]
    pub(crate) print_to_console: bool,
    /// Log every inbound frame as base64
    #[builder(default)]
    pub(crate) print_message_data: bool,
    /// Upper bound on socket-open attempts when `start` is asked to retry. `None` retries
    /// until cancelled.
    pub(crate) max_connect_attempts: Option<u32>,
    /// Override for the website host. Primarily useful for testing.
    #[builder(into, default = DEFAULT_WEB_HOST.to_owned())]
    pub(crate) web_host: String,
    /// Override for the webcast API host. Primarily useful for testing.
    #[builder(into, default = DEFAULT_WEBCAST_HOST.to_owned())]
    pub(crate) webcast_host: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::builder().build()
    }
}

impl Settings {
    /// Replaces every degenerate field with its default and leaves the rest untouched.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.reconnect_interval.is_zero() {
            self.reconnect_interval = DEFAULT_RECONNECT_INTERVAL;
        }
        if self.polling_interval.is_zero() {
            self.polling_interval = DEFAULT_POLLING_INTERVAL;
        }
        if self.client_language.is_empty() {
            DEFAULT_CLIENT_LANGUAGE.clone_into(&mut self.client_language);
        }
        if self.socket_buffer_size < MIN_SOCKET_BUFFER_SIZE {
            self.socket_buffer_size = DEFAULT_SOCKET_BUFFER_SIZE;
        }
        self
    }

    #[must_use]
    pub fn should_log(&self, level: LogLevel) -> bool {
        self.print_to_console && self.log_levels.contains(&level)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    #[must_use]
    pub fn socket_buffer_size(&self) -> usize {
        self.socket_buffer_size
    }

    #[must_use]
    pub fn client_language(&self) -> &str {
        &self.client_language
    }
}

/// Emits a `tracing` event when `$settings` enables the given [`LogLevel`].
macro_rules! log_at {
    ($settings:expr, Error, $($arg:tt)+) => {
        if $settings.should_log($crate::config::LogLevel::Error) {
            ::tracing::error!($($arg)+);
        }
    };
    ($settings:expr, Warning, $($arg:tt)+) => {
        if $settings.should_log($crate::config::LogLevel::Warning) {
            ::tracing::warn!($($arg)+);
        }
    };
    ($settings:expr, Information, $($arg:tt)+) => {
        if $settings.should_log($crate::config::LogLevel::Information) {
            ::tracing::info!($($arg)+);
        }
    };
    ($settings:expr, Verbose, $($arg:tt)+) => {
        if $settings.should_log($crate::config::LogLevel::Verbose) {
            ::tracing::debug!($($arg)+);
        }
    };
}

pub(crate) use log_at;

#[cfg(test)]
mod tests {
    use super::*;

    fn custom() -> Settings {
        Settings::builder()
            .timeout(Duration::from_secs(3))
            .reconnect_interval(Duration::from_secs(7))
            .polling_interval(Duration::from_secs(2))
            .socket_buffer_size(1_000_000)
            .client_language("de-DE")
            .build()
    }

    #[test]
    fn defaults_survive_normalization() {
        let settings = Settings::default().normalize();

        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(settings.polling_interval, DEFAULT_POLLING_INTERVAL);
        assert_eq!(settings.socket_buffer_size, DEFAULT_SOCKET_BUFFER_SIZE);
        assert_eq!(settings.client_language, "en-US");
        assert!(settings.download_gift_info, "gifts are downloaded by default");
        assert!(!settings.skip_room_info, "room info is fetched by default");
    }

    #[test]
    fn zero_timeout_only_replaces_timeout() {
        let mut settings = custom();
        settings.timeout = Duration::ZERO;
        let settings = settings.normalize();

        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.reconnect_interval, Duration::from_secs(7));
        assert_eq!(settings.polling_interval, Duration::from_secs(2));
        assert_eq!(settings.socket_buffer_size, 1_000_000);
        assert_eq!(settings.client_language, "de-DE");
    }

    #[test]
    fn zero_intervals_are_replaced_independently() {
        let mut settings = custom();
        settings.reconnect_interval = Duration::ZERO;
        let normalized = settings.normalize();
        assert_eq!(normalized.reconnect_interval, DEFAULT_RECONNECT_INTERVAL);
        assert_eq!(normalized.polling_interval, Duration::from_secs(2));

        let mut settings = custom();
        settings.polling_interval = Duration::ZERO;
        let normalized = settings.normalize();
        assert_eq!(normalized.polling_interval, DEFAULT_POLLING_INTERVAL);
        assert_eq!(normalized.reconnect_interval, Duration::from_secs(7));
        assert_eq!(normalized.timeout, Duration::from_secs(3));
    }

    #[test]
    fn empty_language_falls_back() {
        let settings = Settings::builder().client_language("").build().normalize();
        assert_eq!(settings.client_language, DEFAULT_CLIENT_LANGUAGE);
    }

    #[test]
    fn undersized_buffer_is_replaced() {
        let settings = Settings::builder()
            .socket_buffer_size(10_000)
            .timeout(Duration::from_secs(4))
            .build()
            .normalize();

        assert_eq!(settings.socket_buffer_size, DEFAULT_SOCKET_BUFFER_SIZE);
        assert_eq!(settings.timeout, Duration::from_secs(4));
    }

    #[test]
    fn log_levels_are_checked_by_membership() {
        let settings = Settings::builder()
            .log_levels(BTreeSet::from([LogLevel::Verbose]))
            .build();
        assert!(settings.should_log(LogLevel::Verbose), "verbose is enabled");
        assert!(!settings.should_log(LogLevel::Error), "error is not in the set");

        let muted = Settings::builder().print_to_console(false).build();
        assert!(!muted.should_log(LogLevel::Error), "console output disabled");
    }
}
