//! Query-protocol seam: how a poll worker talks to a game server.

use crate::error::Result;
use crate::model::{InfoResponse, PlayerResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Opens endpoints by address
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Endpoint>>;
}

/// A connected query endpoint
#[async_trait]
pub trait Endpoint: Send {
    async fn info(&mut self) -> Result<InfoResponse>;

    async fn players(&mut self) -> Result<Vec<PlayerResponse>>;

    /// Round-trip latency
    async fn ping(&mut self) -> Result<Duration>;
}
