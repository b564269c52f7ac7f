//! Raw UAT messages and the line-oriented wire format
//!
//! A [`RawMessage`] is a corrected frame payload plus its reception
//! metadata, or a metadata-only record carrying key/value pairs (used
//! for the stream header that advertises the program and version).
//!
//! Messages serialize to a one-line ASCII format:
//!
//! ```txt
//! -8b40d0a8e10e57c0... ;rs=2;rssi=-18.3;t=1577836800.500;
//! +0a1b2c...           ;rssi=-21.0;t=1577836801.250;rt=123456;
//! !program=uatdec;version=0.1.0;fecfix=1;
//! ```
//!
//! `-` marks a downlink, `+` an uplink, and `!` a metadata-only
//! message with no payload. Key/value fields are zero-suppressed:
//! `rs=` (corrected errors), `rssi=` (dBFS, one decimal), `t=`
//! (seconds.millis since the Unix epoch) and `rt=` (a raw hardware
//! timestamp) appear only when nonzero. The parser accepts the same
//! format back, classifying payloads by length and ignoring unknown
//! keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::protocol::{
    DOWNLINK_LONG_BITS, DOWNLINK_LONG_DATA_BYTES, DOWNLINK_SHORT_BITS,
    DOWNLINK_SHORT_DATA_BYTES, UPLINK_BITS, UPLINK_DATA_BYTES,
};

/// Key/value pairs carried by a metadata-only message
pub type MetadataMap = BTreeMap<String, String>;

/// A corrected frame payload with reception metadata
#[derive(Clone, Debug, PartialEq)]
pub struct Burst {
    /// Corrected data bytes, FEC parity removed
    pub payload: Vec<u8>,

    /// Reception time, milliseconds since the Unix epoch; 0 if unknown
    pub received_at: u64,

    /// Symbols corrected by the FEC
    pub errors: u32,

    /// Received signal strength, dBFS
    pub rssi: f32,

    /// Hardware timestamp from the receiving dongle, if any
    pub raw_timestamp: Option<u64>,
}

/// One message from the receiver
#[derive(Clone, Debug, PartialEq)]
pub enum RawMessage {
    DownlinkShort(Burst),
    DownlinkLong(Burst),
    Uplink(Burst),
    Metadata(MetadataMap),
}

/// Failure to parse (or construct) a raw message
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum MessageParseError {
    /// Payload is not a recognized frame length
    #[error("payload of {0} bytes is not a recognized frame length")]
    BadPayloadLength(usize),

    /// Line does not begin with `-`, `+`, or `!`
    #[error("line does not begin with a message prefix")]
    BadPrefix,

    /// Line is shorter than any valid message
    #[error("line too short")]
    TooShort,

    /// Hex payload is missing its closing semicolon
    #[error("missing delimiter after hex payload")]
    MissingDelimiter,

    /// Payload contains a non-hex character or an odd digit count
    #[error("malformed hex payload")]
    BadHex,
}

impl RawMessage {
    /// Classify a corrected payload by its length
    ///
    /// Accepts the three data lengths that the FEC layer can produce;
    /// anything else is an error. A `raw_timestamp` of zero is
    /// normalized to absent.
    pub fn from_payload(
        payload: Vec<u8>,
        received_at: u64,
        errors: u32,
        rssi: f32,
        raw_timestamp: Option<u64>,
    ) -> Result<Self, MessageParseError> {
        let burst = Burst {
            received_at,
            errors,
            rssi,
            raw_timestamp: raw_timestamp.filter(|&t| t != 0),
            payload,
        };

        match burst.payload.len() {
            DOWNLINK_SHORT_DATA_BYTES => Ok(RawMessage::DownlinkShort(burst)),
            DOWNLINK_LONG_DATA_BYTES => Ok(RawMessage::DownlinkLong(burst)),
            UPLINK_DATA_BYTES => Ok(RawMessage::Uplink(burst)),
            other => Err(MessageParseError::BadPayloadLength(other)),
        }
    }

    /// The payload and metadata, for signal-bearing messages
    pub fn burst(&self) -> Option<&Burst> {
        match self {
            RawMessage::DownlinkShort(b) | RawMessage::DownlinkLong(b) | RawMessage::Uplink(b) => {
                Some(b)
            }
            RawMessage::Metadata(_) => None,
        }
    }

    /// Is this a downlink (aircraft-to-ground) message?
    pub fn is_downlink(&self) -> bool {
        matches!(
            self,
            RawMessage::DownlinkShort(_) | RawMessage::DownlinkLong(_)
        )
    }

    /// On-air bits for this message kind, excluding the sync word
    pub fn bit_length(&self) -> usize {
        match self {
            RawMessage::DownlinkShort(_) => DOWNLINK_SHORT_BITS,
            RawMessage::DownlinkLong(_) => DOWNLINK_LONG_BITS,
            RawMessage::Uplink(_) => UPLINK_BITS,
            RawMessage::Metadata(_) => 0,
        }
    }
}

impl fmt::Display for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let burst = match self {
            RawMessage::DownlinkShort(b) | RawMessage::DownlinkLong(b) => {
                write!(f, "-")?;
                b
            }
            RawMessage::Uplink(b) => {
                write!(f, "+")?;
                b
            }
            RawMessage::Metadata(map) => {
                write!(f, "!")?;
                for (key, value) in map {
                    write!(f, "{}={};", key, value)?;
                }
                return Ok(());
            }
        };

        write!(f, "{};", hex::encode(&burst.payload))?;
        if burst.errors > 0 {
            write!(f, "rs={};", burst.errors)?;
        }
        if burst.rssi != 0.0 {
            write!(f, "rssi={:.1};", burst.rssi)?;
        }
        if burst.received_at != 0 {
            write!(
                f,
                "t={}.{:03};",
                burst.received_at / 1000,
                burst.received_at % 1000
            )?;
        }
        if let Some(rt) = burst.raw_timestamp {
            write!(f, "rt={};", rt)?;
        }
        Ok(())
    }
}

// key=value pairs between semicolons, starting at `from`
fn key_value_pairs(line: &str, from: usize) -> impl Iterator<Item = (&str, &str)> {
    line[from..].split(';').filter_map(|field| {
        let (key, value) = field.split_once('=')?;
        (!key.is_empty()).then_some((key, value))
    })
}

impl FromStr for RawMessage {
    type Err = MessageParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.len() < 2 {
            return Err(MessageParseError::TooShort);
        }

        if let Some(rest) = line.strip_prefix('!') {
            let mut metadata = MetadataMap::new();
            for (key, value) in key_value_pairs(rest, 0) {
                metadata.insert(key.to_owned(), value.to_owned());
            }
            return Ok(RawMessage::Metadata(metadata));
        }

        if !line.starts_with(['-', '+']) {
            return Err(MessageParseError::BadPrefix);
        }

        let end_of_data = line[1..]
            .find(';')
            .map(|i| i + 1)
            .ok_or(MessageParseError::MissingDelimiter)?;

        let payload =
            hex::decode(&line[1..end_of_data]).map_err(|_| MessageParseError::BadHex)?;

        let mut errors = 0u32;
        let mut rssi = 0f64;
        let mut received_at = 0u64;
        let mut raw_timestamp = 0u64;

        for (key, value) in key_value_pairs(line, end_of_data + 1) {
            // unknown keys and unparseable values are ignored
            match key {
                "rs" => errors = value.parse().unwrap_or(0),
                "rssi" => rssi = value.parse().unwrap_or(0.0),
                "t" => {
                    received_at = value
                        .parse::<f64>()
                        .map(|secs| (secs * 1000.0) as u64)
                        .unwrap_or(0)
                }
                "rt" => raw_timestamp = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        RawMessage::from_payload(
            payload,
            received_at,
            errors,
            rssi as f32,
            Some(raw_timestamp),
        )
    }
}
