//! UDP game-server query client speaking the A2S protocol.

pub mod client;
pub mod packet;

pub use client::{A2sClient, A2sEndpoint};
pub use packet::PacketError;
