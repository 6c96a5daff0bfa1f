//! The connection controller: discovers the room, signs the endpoint, opens the push socket
//! and keeps it alive until stopped.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use webcast_client_sdk::live::Client;
//! use webcast_client_sdk::ws::ChannelHandler;
//! use webcast_client_sdk::types::CancellationToken;
//!
//! # async fn example() -> webcast_client_sdk::Result<()> {
//! let handler = ChannelHandler::default();
//! let mut responses = handler.subscribe();
//!
//! let client = Client::builder()
//!     .host("some_host")
//!     .handler(Arc::new(handler))
//!     .build()?;
//!
//! let token = CancellationToken::new();
//! if let Some(room_id) = client.start(&token, true).await? {
//!     println!("connected to room {room_id}");
//! }
//!
//! while let Ok(response) = responses.recv().await {
//!     println!("{} messages", response.messages.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod state;

pub use client::Client;
pub use state::ConnectionState;
