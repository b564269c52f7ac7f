//! DO-282B ADS-B payload decoding
//!
//! Decodes a downlink [`RawMessage`] into semantic fields. Payloads
//! are addressed the way the MOPS tables are written: 1-indexed by
//! byte and bit, with bit 1 as the MSB. Every field beyond the header
//! is optional; a field is populated only when the payload type says
//! the enclosing element is present and the encoding says the value is
//! valid.
//!
//! The JSON serialization emits only populated fields, with enums as
//! snake_case strings, the address as six hex digits and the emitter
//! category in its customary `A0`..`D7` notation.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::message::RawMessage;

// round to `dp` decimal places
fn round_to(value: f64, dp: i32) -> f64 {
    let scale = 10f64.powi(dp);
    (value * scale).round() / scale
}

/// Payload bit accessors, 1-indexed by byte and bit (bit 1 = MSB)
///
/// Both accessors panic when the requested range lies outside the
/// payload; the payload-type dispatch table guarantees in-range
/// access for every field this module reads.
#[derive(Clone, Copy)]
struct Payload<'a>(&'a [u8]);

impl Payload<'_> {
    fn bit(&self, byte: usize, bit: usize) -> bool {
        assert!(byte >= 1);
        assert!((1..=8).contains(&bit));

        let index = (byte - 1) * 8 + bit - 1;
        self.0[index >> 3] & (0x80 >> (index & 7)) != 0
    }

    fn bits(&self, first_byte: usize, first_bit: usize, last_byte: usize, last_bit: usize) -> u32 {
        assert!(first_byte >= 1);
        assert!((1..=8).contains(&first_bit));
        assert!((1..=8).contains(&last_bit));

        let first = (first_byte - 1) * 8 + first_bit - 1;
        let last = (last_byte - 1) * 8 + last_bit - 1;
        assert!(first <= last);
        assert!(last - first < 32);
        assert!(last >> 3 < self.0.len(), "bit range exceeds available data");

        let mut out = 0u32;
        for index in first..=last {
            out = (out << 1) | u32::from(self.0[index >> 3] & (0x80 >> (index & 7)) != 0);
        }
        out
    }
}

/// 2.2.4.5.1.2 "ADDRESS QUALIFIER" field
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressQualifier {
    AdsbIcao,
    AdsbOther,
    TisbIcao,
    TisbTrackfile,
    Vehicle,
    FixedBeacon,
    AdsrOther,
    Reserved,
}

impl From<u32> for AddressQualifier {
    fn from(raw: u32) -> Self {
        match raw & 7 {
            0 => AddressQualifier::AdsbIcao,
            1 => AddressQualifier::AdsbOther,
            2 => AddressQualifier::TisbIcao,
            3 => AddressQualifier::TisbTrackfile,
            4 => AddressQualifier::Vehicle,
            5 => AddressQualifier::FixedBeacon,
            6 => AddressQualifier::AdsrOther,
            _ => AddressQualifier::Reserved,
        }
    }
}

/// 2.2.4.5.2.5 "A/G STATE" field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AirGroundState {
    #[serde(rename = "airborne")]
    AirborneSubsonic,
    #[serde(rename = "supersonic")]
    AirborneSupersonic,
    #[serde(rename = "ground")]
    OnGround,
    Reserved,
}

impl From<u32> for AirGroundState {
    fn from(raw: u32) -> Self {
        match raw & 3 {
            0 => AirGroundState::AirborneSubsonic,
            1 => AirGroundState::AirborneSupersonic,
            2 => AirGroundState::OnGround,
            _ => AirGroundState::Reserved,
        }
    }
}

/// 2.2.4.5.2.7.1.1 "VV Src" subfield
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalVelocitySource {
    Geometric,
    Barometric,
}

/// 2.2.4.5.4.4 "EMERGENCY/PRIORITY STATUS" field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyPriorityStatus {
    None,
    General,
    Medical,
    Minfuel,
    Nordo,
    Unlawful,
    Downed,
    Reserved,
}

impl From<u32> for EmergencyPriorityStatus {
    fn from(raw: u32) -> Self {
        match raw & 7 {
            0 => EmergencyPriorityStatus::None,
            1 => EmergencyPriorityStatus::General,
            2 => EmergencyPriorityStatus::Medical,
            3 => EmergencyPriorityStatus::Minfuel,
            4 => EmergencyPriorityStatus::Nordo,
            5 => EmergencyPriorityStatus::Unlawful,
            6 => EmergencyPriorityStatus::Downed,
            _ => EmergencyPriorityStatus::Reserved,
        }
    }
}

/// 2.2.4.5.4.16 SIL Supplement flag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SilSupplement {
    PerHour,
    PerSample,
}

/// 2.2.4.5.6.1 "Selected Altitude Type (SAT)" field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectedAltitudeType {
    McpFcu,
    Fms,
}

/// 2.2.4.5.4.12 "CAPABILITY CODES" field
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CapabilityCodes {
    pub uat_in: bool,
    pub es_in: bool,
    pub tcas_operational: bool,
}

/// 2.2.4.5.4.13 "OPERATIONAL MODES" field
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct OperationalModes {
    pub tcas_ra_active: bool,
    pub ident_active: bool,
    pub atc_services: bool,
}

/// 2.2.4.5.6.5 - 2.2.4.5.6.10 Mode Indicators
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ModeIndicators {
    pub autopilot: bool,
    pub vnav: bool,
    pub altitude_hold: bool,
    pub approach: bool,
    pub lnav: bool,
}

/// A decoded position, degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

/// Aircraft length and width, meters (DO-282B Table 2-35)
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AircraftSize {
    pub length: f64,
    pub width: f64,
}

// DO-282B Table 2-35
const AIRCRAFT_SIZES: [AircraftSize; 16] = [
    AircraftSize { length: 0.0, width: 0.0 }, // no data
    AircraftSize { length: 15.0, width: 23.0 },
    AircraftSize { length: 25.0, width: 28.5 },
    AircraftSize { length: 25.0, width: 34.0 },
    AircraftSize { length: 35.0, width: 33.0 },
    AircraftSize { length: 35.0, width: 38.0 },
    AircraftSize { length: 45.0, width: 39.5 },
    AircraftSize { length: 45.0, width: 45.0 },
    AircraftSize { length: 55.0, width: 45.0 },
    AircraftSize { length: 55.0, width: 52.0 },
    AircraftSize { length: 65.0, width: 59.5 },
    AircraftSize { length: 65.0, width: 67.0 },
    AircraftSize { length: 75.0, width: 72.5 },
    AircraftSize { length: 75.0, width: 80.0 },
    AircraftSize { length: 85.0, width: 80.0 },
    AircraftSize { length: 85.0, width: 90.0 },
];

/// Reception metadata echoed into the JSON output
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Metadata {
    /// Received signal strength, dBFS
    pub rssi: f32,

    /// Symbols corrected by the FEC
    pub errors: u32,

    /// Reception time, milliseconds since the Unix epoch; 0 if unknown
    pub received_at: u64,

    /// Hardware timestamp, if the source provided one
    pub raw_timestamp: Option<u64>,
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("rssi", &round_to(f64::from(self.rssi), 1))?;
        map.serialize_entry("errors", &self.errors)?;
        if self.received_at != 0 {
            map.serialize_entry("received_at", &(self.received_at as f64 / 1000.0))?;
        }
        if let Some(rt) = self.raw_timestamp {
            map.serialize_entry("raw_timestamp", &rt)?;
        }
        map.end()
    }
}

fn hex_address<S: Serializer>(address: &u32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{address:06x}"))
}

fn emitter_category_str<S: Serializer>(
    category: &Option<u32>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let category = category.expect("absent field is skipped");
    let text = [
        b'A' + (category >> 3) as u8,
        b'0' + (category & 7) as u8,
    ];
    serializer.serialize_str(std::str::from_utf8(&text).expect("two ASCII bytes"))
}

/// A message payload cannot be decoded as ADS-B
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Only downlink messages carry ADS-B payloads
    #[error("not a downlink message")]
    NotDownlink,
}

/// A decoded ADS-B payload
///
/// Fields beyond the header are present only when the corresponding
/// payload element exists and carries a valid value. Serialization
/// emits exactly the present fields.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdsbMessage {
    // 2.2.4.5 HEADER element
    #[serde(skip)]
    pub payload_type: u32,
    pub address_qualifier: AddressQualifier,
    #[serde(serialize_with = "hex_address")]
    pub address: u32,

    // 2.2.4.5.2 / 2.2.4.5.3 STATE VECTOR element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometric_altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub airground_state: Option<AirGroundState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub north_velocity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub east_velocity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vv_src: Option<VerticalVelocitySource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_velocity_barometric: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_velocity_geometric: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnetic_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_size: Option<AircraftSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_lateral_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_longitudinal_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_position_offset_applied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_coupled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uplink_feedback: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tisb_site_id: Option<u32>,

    // 2.2.4.5.4 MODE STATUS element
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "emitter_category_str"
    )]
    pub emitter_category: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flightplan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<EmergencyPriorityStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mops_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sil: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmit_mso: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sda: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_p: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_v: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_baro: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_codes: Option<CapabilityCodes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operational_modes: Option<OperationalModes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sil_supplement: Option<SilSupplement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gva: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_antenna: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_supplement: Option<bool>,

    // 2.2.4.5.6 TARGET STATE element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_altitude_type: Option<SelectedAltitudeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_altitude_mcp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_altitude_fms: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barometric_pressure_setting: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_indicators: Option<ModeIndicators>,

    pub metadata: Metadata,
}

impl AdsbMessage {
    /// Decode a downlink message per DO-282B §2.2.4.5
    pub fn decode(raw: &RawMessage) -> Result<Self, DecodeError> {
        if !raw.is_downlink() {
            return Err(DecodeError::NotDownlink);
        }
        let burst = raw.burst().expect("downlink carries a burst");
        let payload = Payload(&burst.payload);

        let mut message = AdsbMessage {
            payload_type: payload.bits(1, 1, 1, 5),
            address_qualifier: AddressQualifier::from(payload.bits(1, 6, 1, 8)),
            address: payload.bits(2, 1, 4, 8),
            position: None,
            pressure_altitude: None,
            geometric_altitude: None,
            nic: None,
            airground_state: None,
            north_velocity: None,
            east_velocity: None,
            vv_src: None,
            vertical_velocity_barometric: None,
            vertical_velocity_geometric: None,
            ground_speed: None,
            magnetic_heading: None,
            true_heading: None,
            true_track: None,
            aircraft_size: None,
            gps_lateral_offset: None,
            gps_longitudinal_offset: None,
            gps_position_offset_applied: None,
            utc_coupled: None,
            uplink_feedback: None,
            tisb_site_id: None,
            emitter_category: None,
            callsign: None,
            flightplan_id: None,
            emergency: None,
            mops_version: None,
            sil: None,
            transmit_mso: None,
            sda: None,
            nac_p: None,
            nac_v: None,
            nic_baro: None,
            capability_codes: None,
            operational_modes: None,
            sil_supplement: None,
            gva: None,
            single_antenna: None,
            nic_supplement: None,
            selected_altitude_type: None,
            selected_altitude_mcp: None,
            selected_altitude_fms: None,
            barometric_pressure_setting: None,
            selected_heading: None,
            mode_indicators: None,
            metadata: Metadata {
                rssi: burst.rssi,
                errors: burst.errors,
                received_at: burst.received_at,
                raw_timestamp: burst.raw_timestamp,
            },
        };

        // DO-282B Table 2-10 "Composition of the ADS-B Payload"
        match message.payload_type {
            0 => {
                message.decode_sv(payload);
            }
            1 => {
                message.decode_sv(payload);
                message.decode_ms(payload);
                message.decode_auxsv(payload);
            }
            2 | 5 => {
                message.decode_sv(payload);
                message.decode_auxsv(payload);
            }
            3 => {
                message.decode_sv(payload);
                message.decode_ms(payload);
                message.decode_ts(payload, 30);
            }
            4 => {
                message.decode_sv(payload);
                message.decode_ts(payload, 30);
            }
            6 => {
                message.decode_sv(payload);
                message.decode_ts(payload, 25);
                message.decode_auxsv(payload);
            }
            7..=10 => {
                message.decode_sv(payload);
            }
            _ => {
                // 11..31, header only
            }
        }

        Ok(message)
    }

    fn decode_sv(&mut self, payload: Payload<'_>) {
        let raw_lat = payload.bits(5, 1, 7, 7);
        let raw_lon = payload.bits(7, 8, 10, 7);

        let raw_alt = payload.bits(11, 1, 12, 4);
        if raw_alt != 0 {
            let altitude = (raw_alt as i32 - 41) * 25;
            if payload.bit(10, 8) {
                // 2.2.4.5.2.2 "ALTITUDE TYPE" field
                self.geometric_altitude = Some(altitude);
            } else {
                self.pressure_altitude = Some(altitude);
            }
        }

        let nic = payload.bits(12, 5, 12, 8);
        self.nic = Some(nic);

        if raw_lat != 0 || raw_lon != 0 || nic != 0 {
            // the north and south pole encode identically; report
            // the north pole in that case
            let mut lat = f64::from(raw_lat) * 360.0 / 16777216.0;
            if lat > 90.0 {
                lat -= 180.0;
            }
            let mut lon = f64::from(raw_lon) * 360.0 / 16777216.0;
            if lon > 180.0 {
                lon -= 360.0;
            }
            self.position = Some(Position {
                lat: round_to(lat, 5),
                lon: round_to(lon, 5),
            });
        }

        let airground_state = AirGroundState::from(payload.bits(13, 1, 13, 2));
        self.airground_state = Some(airground_state);

        // bit 13,3 reserved

        match airground_state {
            AirGroundState::AirborneSubsonic | AirGroundState::AirborneSupersonic => {
                let supersonic = if airground_state == AirGroundState::AirborneSupersonic {
                    4
                } else {
                    1
                };

                let ns_sign = if payload.bit(13, 4) { -1 } else { 1 };
                let raw_ns = payload.bits(13, 5, 14, 6);
                if raw_ns != 0 {
                    self.north_velocity = Some(supersonic * ns_sign * (raw_ns as i32 - 1));
                }

                let ew_sign = if payload.bit(14, 7) { -1 } else { 1 };
                let raw_ew = payload.bits(14, 8, 16, 1);
                if raw_ew != 0 {
                    self.east_velocity = Some(supersonic * ew_sign * (raw_ew as i32 - 1));
                }

                // derive ground speed and true track for convenience;
                // testing for presence here, not non-zero values
                if let (Some(vn), Some(ve)) = (self.north_velocity, self.east_velocity) {
                    let (vn, ve) = (f64::from(vn), f64::from(ve));
                    self.ground_speed = Some(round_to((vn * vn + ve * ve).sqrt(), 1));
                    let mut angle = ve.atan2(vn).to_degrees();
                    if angle < 0.0 {
                        angle += 360.0;
                    }
                    self.true_track = Some(round_to(angle, 1));
                }

                let vv_src = match payload.bits(16, 2, 16, 2) {
                    0 => VerticalVelocitySource::Geometric,
                    _ => VerticalVelocitySource::Barometric,
                };
                self.vv_src = Some(vv_src);
                let vv_sign = if payload.bit(16, 3) { -1 } else { 1 };
                let raw_vv = payload.bits(16, 4, 17, 4);
                if raw_vv != 0 {
                    let vertical_velocity = vv_sign * (raw_vv as i32 - 1) * 64;
                    match vv_src {
                        VerticalVelocitySource::Barometric => {
                            self.vertical_velocity_barometric = Some(vertical_velocity)
                        }
                        VerticalVelocitySource::Geometric => {
                            self.vertical_velocity_geometric = Some(vertical_velocity)
                        }
                    }
                }
            }

            AirGroundState::OnGround => {
                // 13,4 reserved
                let raw_gs = payload.bits(13, 5, 14, 6);
                if raw_gs != 0 {
                    self.ground_speed = Some(f64::from(raw_gs - 1));
                }

                let tah_type = payload.bits(14, 7, 14, 8);
                let angle = round_to(f64::from(payload.bits(15, 1, 16, 1)) * 360.0 / 512.0, 1);
                match tah_type {
                    // 2.2.4.5.2.6.4 / Table 2-28 "Track Angle/Heading Type"
                    1 => self.true_track = Some(angle),
                    2 => self.magnetic_heading = Some(angle),
                    3 => self.true_heading = Some(angle),
                    _ => {} // data unavailable
                }

                let raw_av_size = payload.bits(16, 2, 16, 5);
                if raw_av_size != 0 {
                    self.aircraft_size = Some(AIRCRAFT_SIZES[raw_av_size as usize]);
                }

                if payload.bit(16, 7) {
                    // longitudinal GPS offset
                    let raw_gps_long = payload.bits(16, 8, 17, 4);
                    if raw_gps_long == 1 {
                        self.gps_position_offset_applied = Some(true);
                    } else if raw_gps_long != 0 {
                        self.gps_position_offset_applied = Some(false);
                        self.gps_longitudinal_offset = Some(f64::from(raw_gps_long - 1) * 2.0);
                    }
                } else {
                    // lateral GPS offset; left is negative
                    let raw_gps_lat = payload.bits(16, 8, 17, 2);
                    if (1..=3).contains(&raw_gps_lat) {
                        self.gps_lateral_offset = Some(f64::from(raw_gps_lat) * -2.0);
                    } else if raw_gps_lat != 0 {
                        self.gps_lateral_offset = Some(f64::from(raw_gps_lat - 4) * 2.0);
                    }
                }
            }

            AirGroundState::Reserved => {}
        }

        match self.address_qualifier {
            AddressQualifier::AdsbIcao
            | AddressQualifier::AdsbOther
            | AddressQualifier::Vehicle
            | AddressQualifier::FixedBeacon => {
                self.utc_coupled = Some(payload.bit(17, 5));
                self.uplink_feedback = Some(payload.bits(17, 6, 17, 8));
            }

            AddressQualifier::TisbIcao
            | AddressQualifier::TisbTrackfile
            | AddressQualifier::AdsrOther => {
                self.tisb_site_id = Some(payload.bits(17, 5, 17, 8));
            }

            AddressQualifier::Reserved => {}
        }
    }

    fn decode_ms(&mut self, payload: Payload<'_>) {
        const BASE40_ALPHABET: &[u8; 40] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ *??";

        let raw1 = payload.bits(18, 1, 19, 8);
        let raw2 = payload.bits(20, 1, 21, 8);
        let raw3 = payload.bits(22, 1, 23, 8);

        self.emitter_category = Some((raw1 / 1600) % 40);

        let mut callsign = String::with_capacity(8);
        for group_char in [
            (raw1 / 40) % 40,
            raw1 % 40,
            (raw2 / 1600) % 40,
            (raw2 / 40) % 40,
            raw2 % 40,
            (raw3 / 1600) % 40,
            (raw3 / 40) % 40,
            raw3 % 40,
        ] {
            callsign.push(BASE40_ALPHABET[group_char as usize] as char);
        }

        // trim trailing spaces and code 37
        let trimmed = callsign.trim_end_matches([' ', '*']);
        if !trimmed.is_empty() {
            let trimmed = trimmed.to_owned();
            if payload.bit(27, 7) {
                // CSID field, 1 = callsign, 0 = flight plan ID
                self.callsign = Some(trimmed);
            } else {
                self.flightplan_id = Some(trimmed);
            }
        }

        self.emergency = Some(EmergencyPriorityStatus::from(payload.bits(24, 1, 24, 3)));
        self.mops_version = Some(payload.bits(24, 4, 24, 6));
        self.sil = Some(payload.bits(24, 7, 24, 8));
        self.transmit_mso = Some(payload.bits(25, 1, 25, 6));
        self.sda = Some(payload.bits(25, 7, 25, 8));
        self.nac_p = Some(payload.bits(26, 1, 26, 4));
        self.nac_v = Some(payload.bits(26, 5, 26, 7));
        self.nic_baro = Some(payload.bits(26, 8, 26, 8));

        self.capability_codes = Some(CapabilityCodes {
            uat_in: payload.bit(27, 1),
            es_in: payload.bit(27, 2),
            tcas_operational: payload.bit(27, 3),
        });
        self.operational_modes = Some(OperationalModes {
            tcas_ra_active: payload.bit(27, 4),
            ident_active: payload.bit(27, 5),
            atc_services: payload.bit(27, 6),
        });

        self.sil_supplement = Some(match payload.bits(27, 8, 27, 8) {
            0 => SilSupplement::PerHour,
            _ => SilSupplement::PerSample,
        });
        self.gva = Some(payload.bits(28, 1, 28, 2));
        self.single_antenna = Some(payload.bit(28, 3));
        self.nic_supplement = Some(payload.bit(28, 4));
        // 28,5 .. 29,8 reserved
    }

    fn decode_ts(&mut self, payload: Payload<'_>, startbyte: usize) {
        // TS begins at byte 30 (§2.2.4.5.6) in payload types 3 and 4,
        // or at byte 25 (§2.2.4.5.7) in payload type 6

        let raw_altitude = payload.bits(startbyte, 2, startbyte + 1, 4);
        if raw_altitude != 0 {
            let selected_altitude = (raw_altitude as i32 - 1) * 32;
            if payload.bit(startbyte, 1) {
                self.selected_altitude_type = Some(SelectedAltitudeType::Fms);
                self.selected_altitude_fms = Some(selected_altitude);
            } else {
                self.selected_altitude_type = Some(SelectedAltitudeType::McpFcu);
                self.selected_altitude_mcp = Some(selected_altitude);
            }
        }

        let raw_bps = payload.bits(startbyte + 1, 5, startbyte + 2, 5);
        if raw_bps != 0 {
            self.barometric_pressure_setting = Some(800.0 + f64::from(raw_bps - 1) * 0.8);
        }

        if payload.bit(startbyte + 2, 6) {
            let heading_sign = if payload.bit(startbyte + 2, 7) { -1.0 } else { 1.0 };
            let heading = round_to(
                f64::from(payload.bits(startbyte + 2, 8, startbyte + 3, 7)) * 180.0 / 256.0,
                1,
            );
            self.selected_heading = Some(heading_sign * heading);
        }

        if payload.bit(startbyte + 3, 8) {
            self.mode_indicators = Some(ModeIndicators {
                autopilot: payload.bit(startbyte + 4, 1),
                vnav: payload.bit(startbyte + 4, 2),
                altitude_hold: payload.bit(startbyte + 4, 3),
                approach: payload.bit(startbyte + 4, 4),
                lnav: payload.bit(startbyte + 4, 5),
            });
        }

        // 34,6 .. 34,8 reserved
    }

    fn decode_auxsv(&mut self, payload: Payload<'_>) {
        let raw_alt = payload.bits(30, 1, 31, 4);
        if raw_alt != 0 {
            let altitude = (raw_alt as i32 - 41) * 25;
            // the SV altitude-type bit selects the primary altitude;
            // AUXSV carries the other one
            if payload.bit(10, 8) {
                self.pressure_altitude = Some(altitude);
            } else {
                self.geometric_altitude = Some(altitude);
            }
        }
    }

    /// Serialize to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("ADS-B message serialization cannot fail")
    }
}
