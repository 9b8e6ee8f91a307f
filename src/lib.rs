//! MiniFinder GPS tracker sentence decoding.
//!
//! This library turns the line-oriented ASCII sentences a MiniFinder-family
//! tracker transmits into structured position records, and resolves which
//! device is transmitting on each persistent connection. Framing, transport
//! and persistence belong to the caller.

pub mod minifinder;
pub mod parser;
pub mod pattern;
pub mod position;
pub mod sessions;

pub use minifinder::{Alarm, DecodeError, MessageType, MiniFinderDecoder, PROTOCOL_NAME};
pub use position::{Attribute, AttributeValue, Position};
pub use sessions::{ConnectionId, DeviceSession, IdentityResolver, SessionRegistry};
