/// Lifecycle of a [`super::Client`].
///
/// `Idle → Resolving → Initializing → Connected → Disconnecting → Idle`. `Resolving` is skipped
/// when a room id was supplied, and any failure before the socket is open returns to `Idle`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
pub enum ConnectionState {
    #[default]
    Idle,
    /// Scraping the live page for the room id
    Resolving,
    /// Fetching room info and gifts, signing, opening the socket
    Initializing,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Resolving | Self::Initializing)
    }

    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}
