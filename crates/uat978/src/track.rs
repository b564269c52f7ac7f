//! Per-aircraft field aggregation
//!
//! Collects decoded [`AdsbMessage`] fields into one state record per
//! transmitting address. Each field remembers when it was last
//! reported and when its value last changed, so consumers can age out
//! stale data without the tracker imposing a policy on them. The
//! tracker itself only aggregates; it never synthesizes state the
//! aircraft did not send.

use std::collections::BTreeMap;

use crate::adsb::{
    AddressQualifier, AdsbMessage, AirGroundState, AircraftSize, CapabilityCodes,
    EmergencyPriorityStatus, ModeIndicators, OperationalModes, Position, SilSupplement,
};
use crate::message::RawMessage;

/// A value stamped with its report and change times
///
/// `updated` is the last time the value was reported; `changed` is the
/// last time a report differed from the stored value. Both are
/// milliseconds since the Unix epoch; a field that has never been
/// reported has `updated == 0`.
#[derive(Clone, Debug, PartialEq)]
pub struct AgedField<T> {
    value: Option<T>,
    updated: u64,
    changed: u64,
}

impl<T> Default for AgedField<T> {
    fn default() -> Self {
        Self {
            value: None,
            updated: 0,
            changed: 0,
        }
    }
}

impl<T: Clone + PartialEq> AgedField<T> {
    /// Has this field ever been reported?
    pub fn valid(&self) -> bool {
        self.updated != 0
    }

    pub fn updated(&self) -> u64 {
        self.updated
    }

    pub fn changed(&self) -> u64 {
        self.changed
    }

    /// Milliseconds since the value last changed, as of `at`
    pub fn change_age(&self, at: u64) -> u64 {
        at.saturating_sub(self.changed)
    }

    /// Milliseconds since the value was last reported, as of `at`
    pub fn update_age(&self, at: u64) -> u64 {
        at.saturating_sub(self.updated)
    }

    /// The stored value, if one has been reported
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Store `value` reported at time `at`
    ///
    /// Reports that do not advance `updated` are discarded. Returns
    /// whether the report was accepted.
    pub fn maybe_update(&mut self, at: u64, value: T) -> bool {
        if at > self.updated {
            self.updated = at;
            if self.value.as_ref() != Some(&value) {
                self.changed = at;
            }
            self.value = Some(value);
            true
        } else {
            false
        }
    }
}

/// Aggregated state for one transmitting address
#[derive(Clone, Debug, Default)]
pub struct AircraftState {
    pub last_message_time: u64,
    pub messages: u32,
    rssi: [f32; 16],

    pub position: AgedField<Position>,
    pub pressure_altitude: AgedField<i32>,
    pub geometric_altitude: AgedField<i32>,
    pub nic: AgedField<u32>,
    pub airground_state: AgedField<AirGroundState>,
    pub north_velocity: AgedField<i32>,
    pub east_velocity: AgedField<i32>,
    pub vertical_velocity_barometric: AgedField<i32>,
    pub vertical_velocity_geometric: AgedField<i32>,
    pub ground_speed: AgedField<f64>,
    pub magnetic_heading: AgedField<f64>,
    pub true_heading: AgedField<f64>,
    pub true_track: AgedField<f64>,
    pub aircraft_size: AgedField<AircraftSize>,
    pub gps_lateral_offset: AgedField<f64>,
    pub gps_longitudinal_offset: AgedField<f64>,
    pub gps_position_offset_applied: AgedField<bool>,
    pub utc_coupled: AgedField<bool>,

    pub emitter_category: AgedField<u32>,
    pub callsign: AgedField<String>,
    pub flightplan_id: AgedField<String>,
    pub emergency: AgedField<EmergencyPriorityStatus>,
    pub mops_version: AgedField<u32>,
    pub sil: AgedField<u32>,
    pub transmit_mso: AgedField<u32>,
    pub sda: AgedField<u32>,
    pub nac_p: AgedField<u32>,
    pub nac_v: AgedField<u32>,
    pub nic_baro: AgedField<u32>,
    pub capability_codes: AgedField<CapabilityCodes>,
    pub operational_modes: AgedField<OperationalModes>,
    pub sil_supplement: AgedField<SilSupplement>,
    pub gva: AgedField<u32>,
    pub single_antenna: AgedField<bool>,
    pub nic_supplement: AgedField<bool>,

    /// Horizontal containment radius bound, meters; derived from NIC
    pub horizontal_containment: AgedField<f64>,

    pub selected_altitude_mcp: AgedField<i32>,
    pub selected_altitude_fms: AgedField<i32>,
    pub barometric_pressure_setting: AgedField<f64>,
    pub selected_heading: AgedField<f64>,
    pub mode_indicators: AgedField<ModeIndicators>,
}

/// Horizontal containment radius bound for a NIC value, meters
///
/// NIC 6 depends on the NIC supplement flag; unknown and reserved
/// values map to 0.
pub fn containment_radius(nic: u32, nic_supplement: bool) -> f64 {
    match nic {
        1 => 37040.0,
        2 => 14816.0,
        3 => 7408.0,
        4 => 3704.0,
        5 => 1852.0,
        6 if nic_supplement => 555.6,
        6 => 1111.2,
        7 => 370.4,
        8 => 185.2,
        9 => 75.0,
        10 => 25.0,
        11 => 7.5,
        _ => 0.0, // 0 unknown, 12..15 reserved
    }
}

impl AircraftState {
    /// Fold one decoded message into this state
    ///
    /// Messages older than the newest one already folded in are
    /// discarded.
    pub fn update_from_message(&mut self, message: &AdsbMessage) {
        let at = message.metadata.received_at;
        if at < self.last_message_time {
            // out of order message
            return;
        }

        macro_rules! update {
            ($field:ident) => {
                if let Some(value) = &message.$field {
                    self.$field.maybe_update(at, value.clone());
                }
            };
        }

        update!(position);
        update!(pressure_altitude);
        update!(geometric_altitude);
        update!(nic);
        update!(airground_state);
        update!(north_velocity);
        update!(east_velocity);
        update!(vertical_velocity_barometric);
        update!(vertical_velocity_geometric);
        update!(ground_speed);
        update!(magnetic_heading);
        update!(true_heading);
        update!(true_track);
        update!(aircraft_size);
        update!(gps_lateral_offset);
        update!(gps_longitudinal_offset);
        update!(gps_position_offset_applied);
        update!(utc_coupled);

        update!(emitter_category);
        update!(callsign);
        update!(flightplan_id);
        update!(emergency);
        update!(mops_version);
        update!(sil);
        update!(transmit_mso);
        update!(sda);
        update!(nac_p);
        update!(nac_v);
        update!(nic_baro);
        update!(capability_codes);
        update!(operational_modes);
        update!(sil_supplement);
        update!(gva);
        update!(single_antenna);
        update!(nic_supplement);

        update!(selected_altitude_mcp);
        update!(selected_altitude_fms);
        update!(barometric_pressure_setting);
        update!(selected_heading);
        update!(mode_indicators);

        if let Some(nic) = message.nic {
            let supplement = *self.nic_supplement.value().unwrap_or(&false);
            self.horizontal_containment
                .maybe_update(at, containment_radius(nic, supplement));
        }

        self.rssi[self.messages as usize % self.rssi.len()] = message.metadata.rssi;
        self.last_message_time = at;
        self.messages += 1;
    }

    /// Mean RSSI over the last sixteen messages, dBFS
    pub fn average_rssi(&self) -> f64 {
        if self.messages == 0 {
            return 0.0;
        }

        let window = (self.messages as usize).min(self.rssi.len());
        self.rssi.iter().map(|&r| f64::from(r)).sum::<f64>() / window as f64
    }
}

/// Address key: the qualifier disambiguates the 24-bit address spaces
pub type AddressKey = (AddressQualifier, u32);

/// Aggregates downlink messages into per-aircraft state
///
/// The caller drives time explicitly: [`handle_messages`]
/// (Tracker::handle_messages) takes the current wall clock and
/// discards messages too far from it, and [`purge_old`]
/// (Tracker::purge_old) should be invoked periodically to drop
/// aircraft that have gone quiet.
pub struct Tracker {
    aircraft: BTreeMap<AddressKey, AircraftState>,
    timeout_ms: u64,
    total_messages: u32,
}

// accept messages up to 15 s old or 1 s into the future
const PAST_FUZZ_MS: u64 = 15_000;
const FUTURE_FUZZ_MS: u64 = 1_000;

impl Tracker {
    /// New tracker dropping aircraft unheard for `timeout_ms`
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            aircraft: BTreeMap::new(),
            timeout_ms,
            total_messages: 0,
        }
    }

    pub fn aircraft(&self) -> &BTreeMap<AddressKey, AircraftState> {
        &self.aircraft
    }

    pub fn total_messages(&self) -> u32 {
        self.total_messages
    }

    /// Fold downlink messages into the tracked state
    ///
    /// `now` is the current wall clock in milliseconds since the Unix
    /// epoch. Non-downlink messages, undecodable messages, and
    /// messages whose timestamps are not contemporaneous with `now`
    /// are skipped.
    pub fn handle_messages(&mut self, now: u64, messages: &[RawMessage]) {
        for raw in messages {
            if !raw.is_downlink() {
                continue;
            }

            let received_at = raw.burst().expect("downlink carries a burst").received_at;
            if received_at == 0
                || received_at < now.saturating_sub(PAST_FUZZ_MS)
                || received_at > now + FUTURE_FUZZ_MS
            {
                continue;
            }

            if let Ok(message) = AdsbMessage::decode(raw) {
                self.handle_message(&message);
            }
        }
    }

    fn handle_message(&mut self, message: &AdsbMessage) {
        let key = (message.address_qualifier, message.address);
        self.aircraft
            .entry(key)
            .or_default()
            .update_from_message(message);
        self.total_messages += 1;
    }

    /// Drop aircraft unheard since before the timeout, as of `now`
    pub fn purge_old(&mut self, now: u64) {
        let expires = now.saturating_sub(self.timeout_ms);
        self.aircraft
            .retain(|_, state| state.last_message_time >= expires);
    }
}

impl Default for Tracker {
    /// A tracker with the customary 300 second timeout
    fn default() -> Self {
        Self::new(300_000)
    }
}
