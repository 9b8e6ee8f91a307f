//! Sentence classification and decoding.
//!
//! Sentences look like `!D,22/12/14,13:40:58,56.899601,14.811541,0,0,1,161.9,41,10,12,1.60`:
//! a `!` lead character, a type marker, then comma-separated fields. `!1`
//! registers the device identity for the connection; every other supported
//! type decodes into a [`Position`] once an identity is bound.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, warn};

use crate::parser::{DateTimeOrder, FieldParser};
use crate::pattern::{Pattern, PatternBuilder};
use crate::position::{Attribute, Position};
use crate::sessions::{ConnectionId, IdentityResolver};

use super::flags::decode_flags;

pub const PROTOCOL_NAME: &str = "minifinder";

const KPH_PER_KNOT: f64 = 1.852;

/// Trackers transmit speed in km/h; records carry knots.
fn knots_from_kph(kph: f64) -> f64 {
    kph / KPH_PER_KNOT
}

/// Date/time/latitude/longitude block shared by all track sentences.
static FIX_BLOCK: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .number("(d+)/(d+)/(d+),") // date (dd/mm/yy)
        .number("(d+):(d+):(d+),") // time (hh:mm:ss)
        .number("(-?d+.d+),") // latitude
        .number("(-?d+.d+),") // longitude
        .compile()
});

/// Speed/course/flags/altitude/battery block appended to full track
/// sentences.
static STATE_BLOCK: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .number("(d+.?d*),") // speed (km/h)
        .number("(d+.?d*),") // course
        .hex("(x+),") // flags
        .number("(-?d+.d+),") // altitude (meters)
        .number("(d+),") // battery (percent)
        .compile()
});

static PATTERN_TRACK: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .text("![BD],") // B buffered, D live
        .pattern(&FIX_BLOCK)
        .pattern(&STATE_BLOCK)
        .number("(d+),") // satellites in use
        .number("(d+),") // satellites in view
        .number("(d+.?d*)") // hdop
        .compile()
});

static PATTERN_SECONDARY: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .literal("!C,")
        .pattern(&FIX_BLOCK)
        .pattern(&STATE_BLOCK)
        .any()
        .compile()
});

static PATTERN_MINIMAL: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .literal("!A,")
        .pattern(&FIX_BLOCK)
        .any()
        .compile()
});

static PATTERN_RESULT: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .literal("!3,")
        .text("(ok|error)") // result of the last configuration command
        .compile()
});

static PATTERN_SIGNAL: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .literal("!5,")
        .number("(d+),") // signal quality (CSQ)
        .text("([^;]+)") // A: GPS fix available, V: no fix
        .compile()
});

static PATTERN_FIRMWARE: Lazy<Pattern> = Lazy::new(|| {
    PatternBuilder::new()
        .literal("!7,")
        .text("([^,]+),") // firmware version
        .number("(d+)") // signal quality (CSQ)
        .compile()
});

/// Sentence types, selected by the marker between `!` and the first comma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// `!A`: fix block only; unspecified trailing fields tolerated.
    TrackMinimal,
    /// `!B`: buffered full track report.
    TrackBuffered,
    /// `!C`: fix and state blocks, without satellite quality fields.
    TrackSecondary,
    /// `!D`: live full track report.
    TrackLive,
    /// `!3`: result of the last configuration command.
    CommandResult,
    /// `!4`: periodic self-check report; recognized but not decoded.
    CheckStatus,
    /// `!5`: signal quality and GPS availability.
    SignalReport,
    /// `!7`: firmware version and signal quality.
    FirmwareInfo,
}

impl MessageType {
    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "A" => Some(Self::TrackMinimal),
            "B" => Some(Self::TrackBuffered),
            "C" => Some(Self::TrackSecondary),
            "D" => Some(Self::TrackLive),
            "3" => Some(Self::CommandResult),
            "4" => Some(Self::CheckStatus),
            "5" => Some(Self::SignalReport),
            "7" => Some(Self::FirmwareInfo),
            _ => None,
        }
    }
}

/// Why a sentence produced no record.
///
/// Every variant is reported; a sentence arriving before the connection
/// has a bound identity is not an error and is dropped silently.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unrecognized sentence: {0}")]
    UnknownMarker(String),
    #[error("invalid sentence: {0}")]
    InvalidSentence(String),
    #[error("unsupported sentence: {0}")]
    UnsupportedSentence(String),
}

/// Decoder for sentences arriving on persistent tracker connections.
///
/// Stateless per invocation: the injected identity resolver is the only
/// shared collaborator, so one decoder instance can serve concurrent
/// connections.
pub struct MiniFinderDecoder<R: IdentityResolver> {
    identities: Arc<R>,
}

impl<R: IdentityResolver> MiniFinderDecoder<R> {
    pub fn new(identities: Arc<R>) -> Self {
        Self { identities }
    }

    /// Decode one transport-delimited sentence.
    ///
    /// `Ok(None)` for registration frames and for sentences arriving before
    /// the connection has a bound identity. `received_at` stamps records
    /// whose type carries no device time.
    pub fn decode(
        &self,
        connection: ConnectionId,
        sentence: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<Position>, DecodeError> {
        if let Some(rest) = sentence.strip_prefix("!1,") {
            let reported_id = rest.split(',').next().unwrap_or(rest);
            if reported_id.is_empty() {
                debug!(sentence, "registration without an identifier; dropping");
                return Ok(None);
            }
            match self.identities.bind(connection, reported_id) {
                Some(session) => {
                    debug!(
                        device_id = session.device_id(),
                        reported_id, "bound device session"
                    );
                }
                None => {
                    debug!(reported_id, "identity bind failed; dropping registration");
                }
            }
            return Ok(None);
        }

        let Some((marker, message_type)) = classify(sentence) else {
            warn!(sentence, "unrecognized sentence");
            metrics::counter!("minifinder.sentences.unknown_total").increment(1);
            return Err(DecodeError::UnknownMarker(sentence.to_string()));
        };

        let Some(session) = self.identities.resolve(connection) else {
            // Expected until a registration sentence has been seen.
            debug!(sentence, "no device session bound; dropping sentence");
            metrics::counter!("minifinder.sentences.unbound_total").increment(1);
            return Ok(None);
        };

        match decode_message(message_type, marker, sentence, session.device_id(), received_at) {
            Ok(position) => {
                metrics::counter!("minifinder.sentences.decoded_total").increment(1);
                Ok(Some(position))
            }
            Err(error) => {
                match &error {
                    DecodeError::UnsupportedSentence(_) => {
                        warn!(sentence, "unsupported sentence");
                        metrics::counter!("minifinder.sentences.unsupported_total").increment(1);
                    }
                    _ => {
                        warn!(sentence, "invalid sentence");
                        metrics::counter!("minifinder.sentences.invalid_total").increment(1);
                    }
                }
                Err(error)
            }
        }
    }
}

fn classify(sentence: &str) -> Option<(&str, MessageType)> {
    let rest = sentence.strip_prefix('!')?;
    let marker = rest.split(',').next().unwrap_or(rest);
    if marker.is_empty() || marker.len() > 2 {
        return None;
    }
    MessageType::from_marker(marker).map(|message_type| (marker, message_type))
}

fn decode_message(
    message_type: MessageType,
    marker: &str,
    sentence: &str,
    device_id: u64,
    received_at: DateTime<Utc>,
) -> Result<Position, DecodeError> {
    let invalid = || DecodeError::InvalidSentence(sentence.to_string());

    let mut position = Position::new(PROTOCOL_NAME, device_id, received_at);
    position.set(Attribute::Type, marker);

    match message_type {
        MessageType::TrackBuffered | MessageType::TrackLive => {
            let mut parser = FieldParser::new(&PATTERN_TRACK, sentence).ok_or_else(invalid)?;
            decode_fix(&mut position, &mut parser).map_err(|error| {
                debug!(sentence, %error, "rejected fix block");
                invalid()
            })?;
            decode_state(&mut position, &mut parser);
            position.set(Attribute::Satellites, parser.next_int(0));
            position.set(Attribute::SatellitesVisible, parser.next_int(0));
            position.set(Attribute::Hdop, parser.next_double(0.0));
        }
        MessageType::TrackSecondary => {
            let mut parser = FieldParser::new(&PATTERN_SECONDARY, sentence).ok_or_else(invalid)?;
            decode_fix(&mut position, &mut parser).map_err(|error| {
                debug!(sentence, %error, "rejected fix block");
                invalid()
            })?;
            decode_state(&mut position, &mut parser);
        }
        MessageType::TrackMinimal => {
            let mut parser = FieldParser::new(&PATTERN_MINIMAL, sentence).ok_or_else(invalid)?;
            decode_fix(&mut position, &mut parser).map_err(|error| {
                debug!(sentence, %error, "rejected fix block");
                invalid()
            })?;
        }
        MessageType::CommandResult => {
            let mut parser = FieldParser::new(&PATTERN_RESULT, sentence).ok_or_else(invalid)?;
            if let Some(status) = parser.next() {
                position.set(Attribute::Status, status);
            }
        }
        MessageType::CheckStatus => {
            return Err(DecodeError::UnsupportedSentence(sentence.to_string()));
        }
        MessageType::SignalReport => {
            let mut parser = FieldParser::new(&PATTERN_SIGNAL, sentence).ok_or_else(invalid)?;
            position.set(Attribute::Rssi, parser.next_int(0));
            if let Some(availability) = parser.next() {
                position.set(Attribute::Gps, availability);
            }
        }
        MessageType::FirmwareInfo => {
            let mut parser = FieldParser::new(&PATTERN_FIRMWARE, sentence).ok_or_else(invalid)?;
            if let Some(version) = parser.next() {
                position.set(Attribute::Status, version);
            }
            position.set(Attribute::Rssi, parser.next_int(0));
        }
    }

    Ok(position)
}

/// Shared date/time/latitude/longitude block.
fn decode_fix(position: &mut Position, parser: &mut FieldParser) -> anyhow::Result<()> {
    position.timestamp = parser.next_date_time(DateTimeOrder::DayMonthYearHms)?;
    position.latitude = parser.next_double(0.0);
    position.longitude = parser.next_double(0.0);
    Ok(())
}

/// Shared speed/course/flags/altitude/battery block.
fn decode_state(position: &mut Position, parser: &mut FieldParser) {
    position.speed_knots = knots_from_kph(parser.next_double(0.0));
    position.set_course(parser.next_double(0.0));

    let flags = decode_flags(parser.next_hex_int(0));
    position.valid = flags.valid;
    if flags.approximate {
        position.set(Attribute::Approximate, true);
    }
    if let Some(alarm) = flags.alarm {
        position.set(Attribute::Alarm, alarm.as_str());
    }
    position.set(Attribute::Rssi, i64::from(flags.rssi));
    position.set(Attribute::Charge, flags.charging);

    position.altitude_meters = parser.next_double(0.0);
    position.set(Attribute::BatteryLevel, parser.next_int(0));
}
