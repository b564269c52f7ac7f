//! Stratux v3 UAT dongle input
//!
//! The Stratux v3 dongle (a TI CC1310) demodulates UAT frames in
//! hardware and emits them over USB serial at 2 Mbps, still carrying
//! their FEC parity. The framing is:
//!
//! ```txt
//! 0A B0 CD E0   preamble
//! ll ll         payload length, little-endian
//! ss            RSSI, signed dBm
//! tt tt tt tt   timestamp, little-endian, 4 MHz tick
//! pp pp ...     payload
//! ```
//!
//! Frame payloads run through the same Reed-Solomon correction as
//! locally demodulated frames. The hardware timestamp anchors to the
//! wall clock at the first message of each read and extrapolates at
//! 4000 ticks per millisecond until the counter runs backwards.
//!
//! The serial port is opened as a plain file; configure it for
//! 2 Mbps 8N1 (e.g. with stty) before starting.

use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::Sender;
use log::{info, warn};

use uat978::protocol::{DOWNLINK_LONG_BYTES, UPLINK_BYTES};
use uat978::{Fec, RawMessage};

use crate::source::{now_millis, SourceEvent};

const PREAMBLE: [u8; 4] = [0x0a, 0xb0, 0xcd, 0xe0];

// RSSI, timestamp header bytes in front of the payload
const HEADER_BYTES: usize = 5;

// 2 Mbps, 8N1: 200 wire bytes per millisecond
const BYTES_PER_MS: u64 = 200;

// hardware timestamp rate: 4 MHz = 4000 ticks per millisecond
const TICKS_PER_MS: u64 = 4000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParserState {
    /// Scanning for the preamble sequence
    Preamble,
    /// Reading the first (low) length byte
    Length1,
    /// Reading the second (high) length byte
    Length2,
    /// Reading RSSI, timestamp, and payload
    Message,
}

/// Incremental parser for the dongle's serial framing
pub struct StratuxParser {
    fec: Fec,
    state: ParserState,
    preamble_index: usize,
    message: Vec<u8>,
    message_length: usize,
    message_start_timestamp: u64,
}

impl StratuxParser {
    pub fn new() -> Self {
        Self {
            fec: Fec::new(),
            state: ParserState::Preamble,
            preamble_index: 0,
            message: Vec::new(),
            message_length: 0,
            message_start_timestamp: 0,
        }
    }

    /// Parse one read's worth of serial bytes
    ///
    /// `now` is the wall clock (ms since the Unix epoch) when the read
    /// completed; the read is assumed to have arrived at wire rate, so
    /// the start of the buffer is back-dated accordingly.
    pub fn parse(&mut self, now: u64, buf: &[u8]) -> Vec<RawMessage> {
        let start_of_read = now.saturating_sub(buf.len() as u64 / BYTES_PER_MS);
        let mut messages = Vec::new();

        // anchor for timestamp extrapolation within this read
        let mut previous_sys_timestamp = 0u64;
        let mut previous_raw_timestamp = 0u32;

        let mut i = 0;
        while i < buf.len() {
            match self.state {
                ParserState::Preamble => {
                    if buf[i] == PREAMBLE[self.preamble_index] {
                        if self.preamble_index == 0 {
                            // remember the (system) time of the preamble start
                            self.message_start_timestamp =
                                start_of_read + i as u64 / BYTES_PER_MS;
                        }
                        i += 1;
                        self.preamble_index += 1;
                        if self.preamble_index >= PREAMBLE.len() {
                            self.state = ParserState::Length1;
                        }
                    } else if self.preamble_index > 0 {
                        self.preamble_index = 0;
                    } else {
                        i += 1;
                    }
                }

                ParserState::Length1 => {
                    self.message_length = buf[i] as usize + HEADER_BYTES;
                    i += 1;
                    self.state = ParserState::Length2;
                }

                ParserState::Length2 => {
                    self.message_length += (buf[i] as usize) << 8;
                    i += 1;
                    self.message.clear();
                    self.state = ParserState::Message;
                }

                ParserState::Message => {
                    let take = (self.message_length - self.message.len()).min(buf.len() - i);
                    self.message.extend_from_slice(&buf[i..i + take]);
                    i += take;

                    if self.message.len() == self.message_length {
                        let raw_timestamp = LittleEndian::read_u32(&self.message[1..5]);
                        let sys_timestamp = if previous_sys_timestamp != 0
                            && raw_timestamp > previous_raw_timestamp
                        {
                            previous_sys_timestamp
                                + u64::from(raw_timestamp - previous_raw_timestamp) / TICKS_PER_MS
                        } else {
                            previous_sys_timestamp = self.message_start_timestamp;
                            previous_raw_timestamp = raw_timestamp;
                            self.message_start_timestamp
                        };

                        if let Some(message) = self.parse_message(sys_timestamp) {
                            messages.push(message);
                        }
                        self.message.clear();
                        self.state = ParserState::Preamble;
                        self.preamble_index = 0;
                    }
                }
            }
        }

        messages
    }

    // correct and classify one framed message
    fn parse_message(&self, sys_timestamp: u64) -> Option<RawMessage> {
        debug_assert!(self.message.len() >= HEADER_BYTES);

        // RSSI is assumed to be in the format the CC1310 reports:
        // signed dBm
        let rssi = f32::from(self.message[0] as i8);
        let raw_timestamp = LittleEndian::read_u32(&self.message[1..5]);

        let payload = &self.message[HEADER_BYTES..];
        let (corrected, errors) = match payload.len() {
            UPLINK_BYTES => self.fec.correct_uplink(payload, &[])?,
            DOWNLINK_LONG_BYTES => self.fec.correct_downlink(payload, &[])?,
            // unexpected length
            _ => return None,
        };

        RawMessage::from_payload(
            corrected,
            sys_timestamp,
            errors as u32,
            rssi,
            Some(u64::from(raw_timestamp)),
        )
        .ok()
    }
}

impl Default for StratuxParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and parse dongle frames from the serial port at `path`
pub fn run_stratux_source(
    path: &std::path::Path,
    tx: &Sender<SourceEvent>,
    halt: &Arc<AtomicBool>,
) {
    let mut port = match File::open(path).with_context(|| format!("unable to open {path:?}")) {
        Ok(port) => port,
        Err(e) => {
            let _ = tx.send(SourceEvent::Error(e));
            return;
        }
    };

    info!("reading Stratux v3 messages from {path:?}");

    let mut parser = StratuxParser::new();
    let mut buf = [0u8; 4096];

    loop {
        if halt.load(Ordering::Relaxed) {
            return;
        }

        match port.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(SourceEvent::Eof);
                return;
            }
            Ok(n) => {
                let messages = parser.parse(now_millis(), &buf[..n]);
                if !messages.is_empty() && tx.send(SourceEvent::Messages(messages)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("serial read failed: {e}");
                let _ = tx.send(SourceEvent::Error(e.into()));
                return;
            }
        }
    }
}
