#![allow(dead_code)]

use async_trait::async_trait;
use overseer_core::config::ObserverConfig;
use overseer_core::model::{InfoResponse, PlayerResponse};
use overseer_core::{
    Endpoint, OverseerError, QueryClient, Result, Server, ServerStore, Watchlist, WatchlistEntry,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Query client backed by an in-memory table of `addr -> player names`.
/// Unknown addresses fail to connect.
#[derive(Default)]
pub struct FakeQuery {
    servers: Mutex<HashMap<String, Vec<String>>>,
    connects: Mutex<HashMap<String, usize>>,
}

impl FakeQuery {
    pub fn set_players(&self, addr: &str, names: &[&str]) {
        self.servers.lock().unwrap().insert(
            addr.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }

    pub fn connects(&self, addr: &str) -> usize {
        self.connects.lock().unwrap().get(addr).copied().unwrap_or(0)
    }
}

struct FakeEndpoint {
    players: Vec<String>,
}

#[async_trait]
impl QueryClient for FakeQuery {
    async fn connect(&self, addr: &str) -> Result<Box<dyn Endpoint>> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(addr.to_string())
            .or_default() += 1;
        let players = self
            .servers
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| OverseerError::network(addr, "connection refused"))?;
        Ok(Box::new(FakeEndpoint { players }))
    }
}

#[async_trait]
impl Endpoint for FakeEndpoint {
    async fn info(&mut self) -> Result<InfoResponse> {
        Ok(InfoResponse {
            name: "Fake\0".into(),
            players: self.players.len() as u8,
            max_players: 70,
            ..Default::default()
        })
    }

    async fn players(&mut self) -> Result<Vec<PlayerResponse>> {
        Ok(self
            .players
            .iter()
            .map(|name| PlayerResponse {
                name: name.clone(),
                duration: 30.0,
                ..Default::default()
            })
            .collect())
    }

    async fn ping(&mut self) -> Result<Duration> {
        Ok(Duration::from_millis(25))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    servers: Mutex<HashMap<Uuid, Server>>,
}

impl MemoryStore {
    pub fn insert(&self, name: &str, addr: &str) -> Server {
        let server = Server::new(name, addr).with_id(Uuid::new_v4());
        self.servers
            .lock()
            .unwrap()
            .insert(server.id, server.clone());
        server
    }

    pub fn remove(&self, id: Uuid) {
        self.servers.lock().unwrap().remove(&id);
    }

    pub fn get(&self, id: Uuid) -> Option<Server> {
        self.servers.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn create(&self, mut server: Server) -> Result<Server> {
        if server.id.is_nil() {
            server.id = Uuid::new_v4();
        }
        self.servers
            .lock()
            .unwrap()
            .insert(server.id, server.clone());
        Ok(server)
    }

    async fn list(&self) -> Result<Vec<Server>> {
        let mut list: Vec<Server> = self.servers.lock().unwrap().values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Server> {
        self.get(id)
            .ok_or_else(|| OverseerError::server_not_found(id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Server> {
        self.servers
            .lock()
            .unwrap()
            .values()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| OverseerError::server_name_not_found(name))
    }

    async fn update(&self, server: Server) -> Result<()> {
        let mut servers = self.servers.lock().unwrap();
        match servers.get_mut(&server.id) {
            Some(slot) => {
                *slot = server;
                Ok(())
            }
            None => Err(OverseerError::server_not_found(server.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.servers
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| OverseerError::server_not_found(id))
    }

    async fn save(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWatchlist {
    entries: Mutex<Vec<WatchlistEntry>>,
}

impl MemoryWatchlist {
    pub fn with(names: &[&str]) -> Self {
        Self {
            entries: Mutex::new(names.iter().map(|n| WatchlistEntry::new(*n)).collect()),
        }
    }
}

#[async_trait]
impl Watchlist for MemoryWatchlist {
    async fn list(&self) -> Vec<WatchlistEntry> {
        self.entries.lock().unwrap().clone()
    }

    async fn create(&self, name: &str) -> Result<WatchlistEntry> {
        let entry = WatchlistEntry::new(name);
        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.entries.lock().unwrap().retain(|e| e.id != id);
        Ok(())
    }
}

/// Fast polling for tests
pub fn fast_config() -> ObserverConfig {
    let mut config = ObserverConfig::default();
    config.poll_interval_ms = 10;
    config.query_timeout_ms = 500;
    config.online_threshold_ms = 500;
    config.retry_backoff.initial_ms = 10;
    config.retry_backoff.max_ms = 40;
    config
}
