//! # Message Codec
//!
//! Wire format for everything the controller exchanges with the supervising
//! app. Frames are compact JSON objects with a fixed field order:
//!
//! ```text
//! control  (in)  {"boardId":"1","deviceId":"1","command":"50"}
//! line     (out) {"kind":"line-status","boardId":"1","state":"online"}
//! info     (out) {"kind":"board-info","boardId":"1","devices":[{"deviceId":"1","name":"desk-lamp","value":"50"}]}
//! liveness (out) {"boardId":"1","counter":3}
//! ```
//!
//! Other modules never look at raw bytes; they work with [`ControlMessage`]
//! and the `encode_*` functions only. Every field is mandatory and unknown
//! fields are rejected, so a frame either decodes completely or not at all.

pub mod codec;
pub mod error;

pub use codec::{
    decode_command, encode_board_info, encode_line_status, encode_liveness, Command,
    ControlMessage, APP_BOARD_ID, APP_ONLINE_COMMAND, BOARD_INFO_COMMAND,
};
pub use error::{DecodeError, EncodeError};
