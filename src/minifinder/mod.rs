pub mod decoder;
pub mod flags;

pub use decoder::{DecodeError, MessageType, MiniFinderDecoder, PROTOCOL_NAME};
pub use flags::{Alarm, StatusFlags, decode_flags};
