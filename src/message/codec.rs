use super::error::{DecodeError, EncodeError};
use crate::board::{Board, Device};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Command sent by the app when it comes online and wants a full snapshot.
pub const APP_ONLINE_COMMAND: &str = "online";
/// Command asking the board to report its info without an actuator change.
pub const BOARD_INFO_COMMAND: &str = "info";
/// Board id the supervising app uses for its own frames.
pub const APP_BOARD_ID: &str = "0";

/// What an inbound control frame asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// The app came online; re-announce presence and state
    AppOnline,
    /// Explicit board-info request
    BoardInfoRequest,
    /// Target level in percent. Not range-checked here, the session drops
    /// anything outside `0..=100`. Integers beyond `i64` saturate.
    Level(i64),
}

impl Command {
    pub fn is_sentinel(self) -> bool {
        matches!(self, Command::AppOnline | Command::BoardInfoRequest)
    }

    fn parse(raw: &str) -> Result<Self, DecodeError> {
        match raw {
            APP_ONLINE_COMMAND => Ok(Command::AppOnline),
            BOARD_INFO_COMMAND => Ok(Command::BoardInfoRequest),
            other => match other.parse::<i64>() {
                Ok(level) => Ok(Command::Level(level)),
                Err(_) if is_integer(other) => Ok(Command::Level(if other.starts_with('-') {
                    i64::MIN
                } else {
                    i64::MAX
                })),
                Err(_) => Err(DecodeError::InvalidCommand(other.to_string())),
            },
        }
    }
}

/// Optional sign followed by at least one digit.
fn is_integer(raw: &str) -> bool {
    let digits = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// A validated inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub board_id: String,
    pub device_id: String,
    pub command: Command,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ControlFrame {
    board_id: String,
    device_id: String,
    command: String,
}

#[derive(Serialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum LineState {
    Online,
    Offline,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
enum StatusFrame<'a> {
    LineStatus {
        board_id: &'a str,
        state: LineState,
    },
    BoardInfo {
        board_id: &'a str,
        devices: &'a [Device],
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LivenessFrame<'a> {
    board_id: &'a str,
    counter: u32,
}

/// Presence frame for the status topic. Also used, with `online = false`, as
/// the transport's last will.
pub fn encode_line_status(board_id: &str, online: bool) -> Result<Vec<u8>, EncodeError> {
    let state = if online {
        LineState::Online
    } else {
        LineState::Offline
    };
    Ok(serde_json::to_vec(&StatusFrame::LineStatus { board_id, state })?)
}

/// Full board snapshot. The encoding is a pure function of the board, so two
/// reports without an intervening change are byte-identical.
pub fn encode_board_info(board: &Board) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(&StatusFrame::BoardInfo {
        board_id: board.board_id(),
        devices: board.devices(),
    })?)
}

pub fn encode_liveness(board_id: &str, counter: u32) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(&LivenessFrame { board_id, counter })?)
}

/// Strictly decodes a control frame. Partial parses do not exist: any missing,
/// extra or mistyped field fails the whole frame.
pub fn decode_command(payload: &[u8]) -> Result<ControlMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    // Derived struct decoding also accepts sequences; only objects are frames.
    if !value.is_object() {
        return Err(DecodeError::Malformed(serde_json::Error::custom(
            "control frame must be a JSON object",
        )));
    }
    let frame: ControlFrame = serde_json::from_value(value)?;
    if frame.board_id.is_empty() {
        return Err(DecodeError::EmptyBoardId);
    }
    let command = Command::parse(&frame.command)?;
    debug!(
        "Decoded control frame: board={} device={} command={:?}",
        frame.board_id, frame.device_id, command
    );

    Ok(ControlMessage {
        board_id: frame.board_id,
        device_id: frame.device_id,
        command,
    })
}
