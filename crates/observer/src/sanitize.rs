// Record Sanitisation
//
// Query responses pad strings with NUL bytes and report player slots with no
// name. These helpers normalise a polled record before it is scanned or
// stored. Applying them twice gives the same result as applying them once.

use overseer_core::{Player, PlayersInfo, Server, ServerInfo};

/// Strip leading and trailing NUL characters
pub fn strip_padding(value: &str) -> &str {
    value.trim_matches('\0')
}

fn strip_in_place(value: &mut String) {
    let stripped = strip_padding(value);
    if stripped.len() != value.len() {
        *value = stripped.to_string();
    }
}

/// In-place NUL-padding removal
pub trait Sanitize {
    fn sanitize(&mut self);
}

impl Sanitize for ServerInfo {
    fn sanitize(&mut self) {
        for field in [
            &mut self.name,
            &mut self.map,
            &mut self.folder,
            &mut self.game,
            &mut self.server_type,
            &mut self.environment,
            &mut self.version,
        ] {
            strip_in_place(field);
        }
        for field in [&mut self.source_tv_name, &mut self.keywords]
            .into_iter()
            .flatten()
        {
            strip_in_place(field);
        }
    }
}

impl Sanitize for Player {
    fn sanitize(&mut self) {
        strip_in_place(&mut self.name);
    }
}

impl Sanitize for PlayersInfo {
    fn sanitize(&mut self) {
        for player in &mut self.players {
            player.sanitize();
        }
    }
}

impl Sanitize for Server {
    fn sanitize(&mut self) {
        strip_in_place(&mut self.name);
        strip_in_place(&mut self.addr);
        if let Some(info) = self.server_info.as_mut() {
            info.sanitize();
        }
        if let Some(players) = self.players_info.as_mut() {
            players.sanitize();
        }
    }
}

/// Drop nameless players and make `server_info.players` match the list.
pub fn correct_player_count(server: &mut Server) {
    let Some(players) = server.players_info.as_mut() else {
        return;
    };
    players.players.retain(|p| !p.name.is_empty());
    let count = players.players.len() as u32;
    if let Some(info) = server.server_info.as_mut() {
        info.players = count;
    }
}
