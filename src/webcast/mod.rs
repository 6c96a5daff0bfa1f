//! Everything that happens over HTTP before the push socket is opened: room id discovery,
//! room info, the gift catalog and endpoint signing.

pub mod client;
pub mod params;
pub mod room;
pub mod types;

pub use client::Client;
pub use params::QueryParams;
