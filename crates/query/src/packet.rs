//! A2S wire format: request builders and single-packet response parsers.
//!
//! All multi-byte integers are little-endian. Strings are NUL-terminated and
//! decoded lossily.

use bytes::{Buf, BufMut, BytesMut};
use overseer_core::model::{InfoResponse, PlayerResponse};
use thiserror::Error;

pub const SINGLE_PACKET: i32 = -1;
pub const SPLIT_PACKET: i32 = -2;

pub const A2S_INFO: u8 = 0x54;
pub const A2S_PLAYER: u8 = 0x55;
pub const S2C_CHALLENGE: u8 = 0x41;
pub const S2A_INFO: u8 = 0x49;
pub const S2A_PLAYER: u8 = 0x44;

const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";
const NO_CHALLENGE: i32 = -1;

/// App id of "The Ship", which inserts three extra bytes before the version
const THE_SHIP_APP_ID: u16 = 2400;

const EDF_PORT: u8 = 0x80;
const EDF_STEAM_ID: u8 = 0x10;
const EDF_SOURCE_TV: u8 = 0x40;
const EDF_KEYWORDS: u8 = 0x20;
const EDF_GAME_ID: u8 = 0x01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated while reading {0}")]
    Truncated(&'static str),
    #[error("split responses are not supported")]
    Split,
    #[error("unknown packet header {0}")]
    BadHeader(i32),
    #[error("unexpected response type 0x{0:02x}")]
    UnexpectedType(u8),
}

/// One decoded datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Challenge(i32),
    Info(InfoResponse),
    Players(Vec<PlayerResponse>),
}

pub fn info_request(challenge: Option<i32>) -> BytesMut {
    let mut buf = BytesMut::with_capacity(29);
    buf.put_i32_le(SINGLE_PACKET);
    buf.put_u8(A2S_INFO);
    buf.put_slice(INFO_PAYLOAD);
    if let Some(challenge) = challenge {
        buf.put_i32_le(challenge);
    }
    buf
}

pub fn player_request(challenge: Option<i32>) -> BytesMut {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_i32_le(SINGLE_PACKET);
    buf.put_u8(A2S_PLAYER);
    buf.put_i32_le(challenge.unwrap_or(NO_CHALLENGE));
    buf
}

pub fn parse_response(mut buf: &[u8]) -> Result<Response, PacketError> {
    let header = read_i32(&mut buf, "header")?;
    match header {
        SINGLE_PACKET => {}
        SPLIT_PACKET => return Err(PacketError::Split),
        other => return Err(PacketError::BadHeader(other)),
    }

    match read_u8(&mut buf, "type")? {
        S2C_CHALLENGE => Ok(Response::Challenge(read_i32(&mut buf, "challenge")?)),
        S2A_INFO => parse_info(&mut buf).map(Response::Info),
        S2A_PLAYER => parse_players(&mut buf).map(Response::Players),
        other => Err(PacketError::UnexpectedType(other)),
    }
}

fn parse_info(buf: &mut &[u8]) -> Result<InfoResponse, PacketError> {
    let mut info = InfoResponse {
        protocol: read_u8(buf, "protocol")?,
        name: read_cstring(buf, "name")?,
        map: read_cstring(buf, "map")?,
        folder: read_cstring(buf, "folder")?,
        game: read_cstring(buf, "game")?,
        id: read_u16(buf, "id")?,
        players: read_u8(buf, "players")?,
        max_players: read_u8(buf, "max players")?,
        bots: read_u8(buf, "bots")?,
        server_type: read_u8(buf, "server type")?,
        environment: read_u8(buf, "environment")?,
        visibility: read_u8(buf, "visibility")?,
        vac: read_u8(buf, "vac")?,
        ..Default::default()
    };

    if info.id == THE_SHIP_APP_ID {
        ensure(buf, 3, "ship fields")?;
        buf.advance(3);
    }
    info.version = read_cstring(buf, "version")?;

    if !buf.has_remaining() {
        return Ok(info);
    }
    let edf = read_u8(buf, "extra data flag")?;
    if edf & EDF_PORT != 0 {
        info.port = Some(read_u16(buf, "port")?);
    }
    if edf & EDF_STEAM_ID != 0 {
        info.steam_id = Some(read_u64(buf, "steam id")?);
    }
    if edf & EDF_SOURCE_TV != 0 {
        info.source_tv_port = Some(read_u16(buf, "source tv port")?);
        info.source_tv_name = Some(read_cstring(buf, "source tv name")?);
    }
    if edf & EDF_KEYWORDS != 0 {
        info.keywords = Some(read_cstring(buf, "keywords")?);
    }
    if edf & EDF_GAME_ID != 0 {
        info.game_id = Some(read_u64(buf, "game id")?);
    }
    Ok(info)
}

fn parse_players(buf: &mut &[u8]) -> Result<Vec<PlayerResponse>, PacketError> {
    let count = read_u8(buf, "player count")?;
    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // some servers announce more players than they send
        if !buf.has_remaining() {
            break;
        }
        players.push(PlayerResponse {
            index: read_u8(buf, "player index")?,
            name: read_cstring(buf, "player name")?,
            score: read_i32(buf, "player score")?,
            duration: read_f32(buf, "player duration")?,
        });
    }
    Ok(players)
}

fn ensure(buf: &&[u8], len: usize, what: &'static str) -> Result<(), PacketError> {
    if buf.remaining() < len {
        return Err(PacketError::Truncated(what));
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8], what: &'static str) -> Result<u8, PacketError> {
    ensure(buf, 1, what)?;
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut &[u8], what: &'static str) -> Result<u16, PacketError> {
    ensure(buf, 2, what)?;
    Ok(buf.get_u16_le())
}

fn read_i32(buf: &mut &[u8], what: &'static str) -> Result<i32, PacketError> {
    ensure(buf, 4, what)?;
    Ok(buf.get_i32_le())
}

fn read_u64(buf: &mut &[u8], what: &'static str) -> Result<u64, PacketError> {
    ensure(buf, 8, what)?;
    Ok(buf.get_u64_le())
}

fn read_f32(buf: &mut &[u8], what: &'static str) -> Result<f32, PacketError> {
    ensure(buf, 4, what)?;
    Ok(buf.get_f32_le())
}

fn read_cstring(buf: &mut &[u8], what: &'static str) -> Result<String, PacketError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(PacketError::Truncated(what))?;
    let value = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(end + 1);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(kind: u8) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_i32_le(SINGLE_PACKET);
        buf.put_u8(kind);
        buf
    }

    fn put_cstr(buf: &mut BytesMut, s: &str) {
        buf.put_slice(s.as_bytes());
        buf.put_u8(0);
    }

    #[test]
    fn test_info_request_layout() {
        let plain = info_request(None);
        assert_eq!(&plain[..5], &[0xFF, 0xFF, 0xFF, 0xFF, A2S_INFO]);
        assert!(plain.ends_with(b"Query\0"));

        let with_challenge = info_request(Some(0x0403_0201));
        assert!(with_challenge.ends_with(&[0x01, 0x02, 0x03, 0x04]));
    }

    #[test]
    fn test_player_request_defaults_to_no_challenge() {
        assert_eq!(
            &player_request(None)[..],
            &[0xFF, 0xFF, 0xFF, 0xFF, A2S_PLAYER, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_parse_challenge() {
        let mut buf = header(S2C_CHALLENGE);
        buf.put_i32_le(1234);
        assert_eq!(parse_response(&buf).unwrap(), Response::Challenge(1234));
    }

    #[test]
    fn test_parse_info_with_extra_data() {
        let mut buf = header(S2A_INFO);
        buf.put_u8(17);
        put_cstr(&mut buf, "Island");
        put_cstr(&mut buf, "TheIsland");
        put_cstr(&mut buf, "ark");
        put_cstr(&mut buf, "ARK");
        buf.put_u16_le(0);
        buf.put_u8(12);
        buf.put_u8(70);
        buf.put_u8(0);
        buf.put_u8(b'd');
        buf.put_u8(b'l');
        buf.put_u8(0);
        buf.put_u8(1);
        put_cstr(&mut buf, "1.0.0.0");
        buf.put_u8(EDF_PORT | EDF_KEYWORDS | EDF_GAME_ID);
        buf.put_u16_le(7777);
        put_cstr(&mut buf, "pve");
        buf.put_u64_le(346110);

        let Response::Info(info) = parse_response(&buf).unwrap() else {
            panic!("expected info");
        };
        assert_eq!(info.name, "Island");
        assert_eq!(info.map, "TheIsland");
        assert_eq!(info.players, 12);
        assert_eq!(info.max_players, 70);
        assert_eq!(info.server_type, b'd');
        assert_eq!(info.vac, 1);
        assert_eq!(info.version, "1.0.0.0");
        assert_eq!(info.port, Some(7777));
        assert_eq!(info.steam_id, None);
        assert_eq!(info.keywords.as_deref(), Some("pve"));
        assert_eq!(info.game_id, Some(346110));
    }

    #[test]
    fn test_parse_players() {
        let mut buf = header(S2A_PLAYER);
        buf.put_u8(3);
        for (name, score, secs) in [("Alice", 5, 61.4_f32), ("", 0, 1.0)] {
            buf.put_u8(0);
            put_cstr(&mut buf, name);
            buf.put_i32_le(score);
            buf.put_f32_le(secs);
        }

        let Response::Players(players) = parse_response(&buf).unwrap() else {
            panic!("expected players");
        };
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "Alice");
        assert_eq!(players[0].score, 5);
        assert!((players[0].duration - 61.4).abs() < f32::EPSILON);
        assert_eq!(players[1].name, "");
    }

    #[test]
    fn test_rejects_split_and_truncated_packets() {
        let mut split = BytesMut::new();
        split.put_i32_le(SPLIT_PACKET);
        assert_eq!(parse_response(&split), Err(PacketError::Split));

        let mut truncated = header(S2A_INFO);
        truncated.put_u8(17);
        truncated.put_slice(b"no terminator");
        assert_eq!(parse_response(&truncated), Err(PacketError::Truncated("name")));

        assert_eq!(parse_response(&[0xFF]), Err(PacketError::Truncated("header")));
        assert_eq!(
            parse_response(&header(0x6D)),
            Err(PacketError::UnexpectedType(0x6D))
        );
    }
}
