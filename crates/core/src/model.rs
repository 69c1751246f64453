//! Overseer Data Model
//!
//! Target records as persisted by the server store, the watchlist entry, and
//! the raw records a query client hands back before normalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Server (target) record
// ============================================================================

/// A remote game server under observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Stable identity, assigned once by the store
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// `host:port` of the query endpoint
    pub addr: String,
    /// Online flag derived from the last measured latency
    #[serde(default)]
    pub status: bool,
    /// Last known server info
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    /// Last known player list
    #[serde(default)]
    pub players_info: Option<PlayersInfo>,
    /// When the last successful poll finished
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Server {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            name: name.into(),
            addr: addr.into(),
            status: false,
            server_info: None,
            players_info: None,
            last_seen: None,
        }
    }

    /// Builder-style id assignment
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Names of currently reported players
    pub fn player_names(&self) -> Vec<&str> {
        self.players_info
            .as_ref()
            .map(|info| info.players.iter().map(|p| p.name.as_str()).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.status { "online" } else { "offline" };
        write!(f, "{} ({}) [{}] {}", self.name, self.addr, state, self.id)
    }
}

/// Server information block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub id: u16,
    pub players: u32,
    pub max_players: u32,
    pub bots: u32,
    pub server_type: String,
    pub environment: String,
    pub visibility: bool,
    pub vac: bool,
    pub version: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub steam_id: Option<u64>,
    #[serde(default)]
    pub source_tv_port: Option<u16>,
    #[serde(default)]
    pub source_tv_name: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub game_id: Option<u64>,
}

/// Player list of a server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayersInfo {
    pub players: Vec<Player>,
}

/// A single connected player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub score: i32,
    /// Time connected
    pub duration: Duration,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            score: 0,
            duration: Duration::ZERO,
        }
    }
}

// ============================================================================
// Watchlist
// ============================================================================

/// A player name whose joins and leaves are announced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    #[serde(default = "Uuid::nil")]
    pub id: Uuid,
    pub name: String,
}

impl WatchlistEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

// ============================================================================
// Raw query records
// ============================================================================

/// Info record as decoded from the wire, before normalization
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoResponse {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub server_type: u8,
    pub environment: u8,
    pub visibility: u8,
    pub vac: u8,
    pub version: String,
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub source_tv_port: Option<u16>,
    pub source_tv_name: Option<String>,
    pub keywords: Option<String>,
    pub game_id: Option<u64>,
}

/// Player record as decoded from the wire; `duration` is in seconds
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerResponse {
    pub index: u8,
    pub name: String,
    pub score: i32,
    pub duration: f32,
}

fn type_char(code: u8) -> String {
    match code {
        0 => String::new(),
        c => (c as char).to_string(),
    }
}

impl From<InfoResponse> for ServerInfo {
    fn from(info: InfoResponse) -> Self {
        Self {
            protocol: info.protocol,
            name: info.name,
            map: info.map,
            folder: info.folder,
            game: info.game,
            id: info.id,
            players: info.players.into(),
            max_players: info.max_players.into(),
            bots: info.bots.into(),
            server_type: type_char(info.server_type),
            environment: type_char(info.environment),
            visibility: info.visibility != 0,
            vac: info.vac != 0,
            version: info.version,
            port: info.port,
            steam_id: info.steam_id,
            source_tv_port: info.source_tv_port,
            source_tv_name: info.source_tv_name,
            keywords: info.keywords,
            game_id: info.game_id,
        }
    }
}

/// Seconds-as-float to a whole-second `Duration`, rounding to nearest
pub fn duration_from_secs_rounded(secs: f32) -> Duration {
    let rounded = secs.round();
    if rounded.is_finite() && rounded > 0.0 {
        Duration::from_secs(rounded as u64)
    } else {
        Duration::ZERO
    }
}

impl From<PlayerResponse> for Player {
    fn from(player: PlayerResponse) -> Self {
        Self {
            name: player.name,
            score: player.score,
            duration: duration_from_secs_rounded(player.duration),
        }
    }
}

impl From<Vec<PlayerResponse>> for PlayersInfo {
    fn from(players: Vec<PlayerResponse>) -> Self {
        Self {
            players: players.into_iter().map(Player::from).collect(),
        }
    }
}
