// A2S UDP client
//
// One connected UDP socket per endpoint. Every receive is bounded by the
// client's timeout; challenge responses are answered once per request.

use crate::packet::{self, PacketError, Response};
use async_trait::async_trait;
use bytes::BytesMut;
use overseer_core::model::{InfoResponse, PlayerResponse};
use overseer_core::{Endpoint, OverseerError, QueryClient, Result};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

const MAX_PACKET_SIZE: usize = 1400;

#[derive(Debug, Clone)]
pub struct A2sClient {
    timeout: Duration,
}

impl A2sClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl QueryClient for A2sClient {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Endpoint>> {
        let endpoint = A2sEndpoint::connect(addr, self.timeout).await?;
        Ok(Box::new(endpoint))
    }
}

pub struct A2sEndpoint {
    addr: String,
    socket: UdpSocket,
    timeout: Duration,
}

impl A2sEndpoint {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let target = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| OverseerError::network(addr, e.to_string()))?
            .next()
            .ok_or_else(|| OverseerError::network(addr, "address did not resolve"))?;

        let bind: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| OverseerError::network(addr, e.to_string()))?;
        socket
            .connect(target)
            .await
            .map_err(|e| OverseerError::network(addr, e.to_string()))?;

        tracing::debug!("A2S endpoint {} connected ({})", addr, target);
        Ok(Self {
            addr: addr.to_string(),
            socket,
            timeout,
        })
    }

    async fn exchange(&self, request: &BytesMut) -> Result<Response> {
        self.socket
            .send(request)
            .await
            .map_err(|e| OverseerError::network(&self.addr, e.to_string()))?;

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let len = tokio::time::timeout(self.timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| OverseerError::timeout(&self.addr))?
            .map_err(|e| OverseerError::network(&self.addr, e.to_string()))?;

        packet::parse_response(&buf[..len]).map_err(|e| self.protocol_error(e))
    }

    fn protocol_error(&self, err: PacketError) -> OverseerError {
        OverseerError::protocol(&self.addr, err.to_string())
    }

    fn unexpected(&self, what: &str) -> OverseerError {
        OverseerError::protocol(&self.addr, format!("unexpected response to {}", what))
    }
}

#[async_trait]
impl Endpoint for A2sEndpoint {
    async fn info(&mut self) -> Result<InfoResponse> {
        let response = match self.exchange(&packet::info_request(None)).await? {
            Response::Challenge(challenge) => {
                self.exchange(&packet::info_request(Some(challenge))).await?
            }
            other => other,
        };
        match response {
            Response::Info(info) => Ok(info),
            _ => Err(self.unexpected("info request")),
        }
    }

    async fn players(&mut self) -> Result<Vec<PlayerResponse>> {
        let response = match self.exchange(&packet::player_request(None)).await? {
            Response::Challenge(challenge) => {
                self.exchange(&packet::player_request(Some(challenge))).await?
            }
            other => other,
        };
        match response {
            Response::Players(players) => Ok(players),
            _ => Err(self.unexpected("player request")),
        }
    }

    async fn ping(&mut self) -> Result<Duration> {
        let started = Instant::now();
        self.info().await?;
        Ok(started.elapsed())
    }
}
