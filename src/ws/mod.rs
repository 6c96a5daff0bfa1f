//! Push socket infrastructure.
//!
//! # Architecture
//!
//! - [`types`]: protobuf wire shapes and protocol constants
//! - [`Socket`] / [`Connector`]: transport seam, implemented over tokio-tungstenite by
//!   [`TungsteniteConnector`]
//! - [`Connection`]: the receive/acknowledge/dispatch loop and the keep-alive loop, sharing a
//!   [`SocketHandle`]
//! - [`MessageHandler`]: where decoded responses go, with [`ChannelHandler`] for fan-out

pub mod connection;
pub mod error;
pub mod socket;
pub mod traits;
pub mod types;

pub use connection::{Connection, SocketHandle};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use socket::{Connector, Socket, SocketState, SocketTarget, TungsteniteConnector};
pub use traits::*;
