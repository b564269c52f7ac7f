//! # uat978: 978 MHz UAT demodulation and decoding
//!
//! This crate provides a demodulator and decoder for the 978 MHz
//! Universal Access Transceiver (UAT) data link used by ADS-B equipment
//! in the US general-aviation fleet. It turns complex baseband IQ
//! samples at 2.083333 Msps into decoded messages:
//!
//! 1. IQ samples are converted to a buffer of `u16` phase angles
//!    ([`SampleConverter`]).
//! 2. A streaming correlator slides the two 36-bit UAT sync words
//!    across the phase buffer and recovers differentially-encoded
//!    bits ([`Demodulator`]).
//! 3. Residual channel errors are corrected with the shortened
//!    Reed-Solomon codes that UAT specifies ([`Fec`]).
//! 4. Corrected downlink payloads decode into semantic ADS-B fields
//!    per DO-282B ([`AdsbMessage`]), with JSON serialization.
//!
//! The [`Receiver`] ties the pipeline together and manages the
//! rolling sample buffer, so frames that straddle two input chunks
//! are still detected exactly once.
//!
//! ## Example
//!
//! ```
//! use uat978::{ReceiverBuilder, SampleFormat};
//!
//! # let some_iq_source = || Vec::<u8>::new();
//! let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
//!
//! // iq holds interleaved unsigned 8-bit I/Q pairs; the timestamp is
//! // milliseconds since the Unix epoch at the start of the buffer
//! let iq: Vec<u8> = some_iq_source();
//! for message in rx.handle_samples(1577836800000, &iq) {
//!     println!("{}", message);
//! }
//! ```
//!
//! Messages print in the line-oriented hex wire format understood by
//! most UAT tooling; [`AdsbMessage::decode`] turns downlink messages
//! into structured data.
//!
//! This crate performs no I/O of its own. Sample acquisition (SDR,
//! file, pipe) and message distribution are left to the caller.

#![allow(dead_code)]

mod adsb;
mod convert;
mod demod;
mod fec;
mod message;
pub mod protocol;
mod receiver;
#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod testutil;
mod track;

pub use adsb::{
    AddressQualifier, AdsbMessage, AirGroundState, AircraftSize, CapabilityCodes, DecodeError,
    EmergencyPriorityStatus, Metadata, ModeIndicators, OperationalModes, Position,
    SelectedAltitudeType, SilSupplement, VerticalVelocitySource,
};
pub use convert::{converter_for, FormatError, SampleConverter, SampleFormat};
pub use demod::{Demodulator, Frame, SlicerPolicy};
pub use fec::Fec;
pub use message::{Burst, MessageParseError, MetadataMap, RawMessage};
pub use receiver::{Receiver, ReceiverBuilder};
pub use track::{containment_radius, AddressKey, AgedField, AircraftState, Tracker};
