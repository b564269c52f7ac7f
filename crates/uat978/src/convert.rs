//! IQ sample conversion
//!
//! Converts a raw byte stream of complex baseband samples into the two
//! representations the rest of the pipeline works with:
//!
//! * a *phase buffer* of `u16` angles, where the full circle maps to
//!   the full 16-bit range (`value = round(32768·θ/π) mod 65536`).
//!   Because the encoding is modular, subtracting two phase samples
//!   with wrapping arithmetic yields the signed phase difference
//!   directly; every bit slicer downstream relies on this.
//! * a *magnitude-squared buffer* of `f64`, used for per-frame RSSI.
//!
//! One converter exists per supported IQ layout. The 8-bit formats use
//! a single 65,536-entry lookup indexed by the two sample bytes; the
//! 16-bit format synthesizes atan2 from a table of atan over the ratio
//! `256·y/x` with quadrant dispatch (max error about 0.2°); the float
//! format calls the host `atan2`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Recognized IQ sample layouts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit I/Q pairs (RTL-SDR native)
    Cu8,

    /// Signed 8-bit I/Q pairs
    Cs8,

    /// Signed 16-bit I/Q pairs, host byte order
    Cs16H,

    /// 32-bit float I/Q pairs, host byte order
    Cf32H,
}

impl SampleFormat {
    /// Size of one complex sample, in bytes
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Cu8 | SampleFormat::Cs8 => 2,
            SampleFormat::Cs16H => 4,
            SampleFormat::Cf32H => 8,
        }
    }

    /// Canonical name, as accepted by [`FromStr`]
    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::Cu8 => "CU8",
            SampleFormat::Cs8 => "CS8",
            SampleFormat::Cs16H => "CS16H",
            SampleFormat::Cf32H => "CF32H",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An unrecognized sample format name
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("unrecognized sample format \"{0}\"")]
pub struct FormatError(String);

impl FromStr for SampleFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CU8" => Ok(SampleFormat::Cu8),
            "CS8" => Ok(SampleFormat::Cs8),
            "CS16H" => Ok(SampleFormat::Cs16H),
            "CF32H" => Ok(SampleFormat::Cf32H),
            other => Err(FormatError(other.to_owned())),
        }
    }
}

/// Converts raw IQ bytes to phase and magnitude-squared buffers
///
/// Both conversion methods consume `len / bytes_per_sample()` whole
/// samples and write that many output values; trailing partial samples
/// are silently ignored. The output slice must be at least that long.
pub trait SampleConverter: Send + Sync {
    /// The layout this converter decodes
    fn format(&self) -> SampleFormat;

    /// Size of one complex sample, in bytes
    fn bytes_per_sample(&self) -> usize {
        self.format().bytes_per_sample()
    }

    /// Convert samples to `u16` phase angles
    fn convert_phase(&self, bytes: &[u8], out: &mut [u16]);

    /// Convert samples to magnitude-squared values
    ///
    /// Full-scale 8-bit input maps to at most 1.0; 16-bit input is
    /// scaled by 2⁻³⁰; float input is passed through unscaled.
    fn convert_magsq(&self, bytes: &[u8], out: &mut [f64]);
}

/// Create the converter for `format`
pub fn converter_for(format: SampleFormat) -> Box<dyn SampleConverter> {
    match format {
        SampleFormat::Cu8 => Box::new(Cu8Converter::new()),
        SampleFormat::Cs8 => Box::new(Cs8Converter::new()),
        SampleFormat::Cs16H => Box::new(Cs16HConverter::new()),
        SampleFormat::Cf32H => Box::new(Cf32HConverter),
    }
}

// Scale an angle from atan2's [-pi, pi] to the u16 encoding:
// shift into [0, 2pi), multiply by 32768/pi, round, clamp.
fn scaled_atan2(y: f64, x: f64) -> u16 {
    let mut ang = y.atan2(x);
    if ang < 0.0 {
        ang += 2.0 * std::f64::consts::PI;
    }
    let scaled = (32768.0 * ang / std::f64::consts::PI).round();
    scaled.clamp(0.0, 65535.0) as u16
}

fn scaled_atan(x: f64) -> u16 {
    let mut ang = x.atan();
    if ang < 0.0 {
        ang += 2.0 * std::f64::consts::PI;
    }
    let scaled = (32768.0 * ang / std::f64::consts::PI).round();
    scaled.clamp(0.0, 65535.0) as u16
}

fn magsq(i: f64, q: f64) -> f64 {
    i * i + q * q
}

// Table index for one 8-bit I/Q pair: the two bytes aliased as a
// host-endian u16, same as the table construction below.
#[inline]
fn iq8_index(pair: &[u8]) -> usize {
    u16::from_ne_bytes([pair[0], pair[1]]) as usize
}

/// Unsigned 8-bit converter (table driven)
struct Cu8Converter {
    phase: Box<[u16]>,
    magsq: Box<[f64]>,
}

impl Cu8Converter {
    fn new() -> Self {
        let mut phase = vec![0u16; 65536].into_boxed_slice();
        let mut mag = vec![0f64; 65536].into_boxed_slice();

        for i in 0u16..256 {
            let d_i = (f64::from(i) - 127.5) / 128.0;
            for q in 0u16..256 {
                let d_q = (f64::from(q) - 127.5) / 128.0;
                let index = u16::from_ne_bytes([i as u8, q as u8]) as usize;
                phase[index] = scaled_atan2(d_q, d_i);
                mag[index] = magsq(d_i, d_q);
            }
        }

        Self { phase, magsq: mag }
    }
}

impl SampleConverter for Cu8Converter {
    fn format(&self) -> SampleFormat {
        SampleFormat::Cu8
    }

    fn convert_phase(&self, bytes: &[u8], out: &mut [u16]) {
        for (pair, out) in bytes.chunks_exact(2).zip(out.iter_mut()) {
            *out = self.phase[iq8_index(pair)];
        }
    }

    fn convert_magsq(&self, bytes: &[u8], out: &mut [f64]) {
        for (pair, out) in bytes.chunks_exact(2).zip(out.iter_mut()) {
            *out = self.magsq[iq8_index(pair)];
        }
    }
}

/// Signed 8-bit converter (table driven)
struct Cs8Converter {
    phase: Box<[u16]>,
    magsq: Box<[f64]>,
}

impl Cs8Converter {
    fn new() -> Self {
        let mut phase = vec![0u16; 65536].into_boxed_slice();
        let mut mag = vec![0f64; 65536].into_boxed_slice();

        for i in -128i16..=127 {
            let d_i = f64::from(i) / 128.0;
            for q in -128i16..=127 {
                let d_q = f64::from(q) / 128.0;
                let index = u16::from_ne_bytes([i as u8, q as u8]) as usize;
                phase[index] = scaled_atan2(d_q, d_i);
                mag[index] = magsq(d_i, d_q);
            }
        }

        Self { phase, magsq: mag }
    }
}

impl SampleConverter for Cs8Converter {
    fn format(&self) -> SampleFormat {
        SampleFormat::Cs8
    }

    fn convert_phase(&self, bytes: &[u8], out: &mut [u16]) {
        for (pair, out) in bytes.chunks_exact(2).zip(out.iter_mut()) {
            *out = self.phase[iq8_index(pair)];
        }
    }

    fn convert_magsq(&self, bytes: &[u8], out: &mut [f64]) {
        for (pair, out) in bytes.chunks_exact(2).zip(out.iter_mut()) {
            *out = self.magsq[iq8_index(pair)];
        }
    }
}

/// Signed 16-bit converter
///
/// atan2 is synthesized from an atan-only lookup covering the ratio
/// `256·y/x` with quadrant dispatch. The dispatch leans on the modular
/// semantics of the u16 phase encoding, so negated angles land in the
/// correct quadrant by wrapping arithmetic alone.
struct Cs16HConverter {
    // atan lookup, positive values only, 8-bit fixed point covering 0.0 .. 256.0
    atan: Box<[u16]>,
}

impl Cs16HConverter {
    fn new() -> Self {
        let mut atan = vec![0u16; 65536].into_boxed_slice();
        for (i, entry) in atan.iter_mut().enumerate() {
            *entry = scaled_atan(i as f64 / 256.0);
        }
        Self { atan }
    }

    // caution, expects unsigned (positive) input only
    #[inline]
    fn table_atan(&self, r: u32) -> u16 {
        match self.atan.get(r as usize) {
            Some(&ang) => ang,
            None => 16384, // saturate at pi/2
        }
    }

    #[inline]
    fn table_atan2(&self, y: i16, x: i16) -> u16 {
        if x == 0 {
            return if y >= 0 {
                16384 // pi/2
            } else {
                49152 // 3/2 pi
            };
        }

        let r = (256 * i32::from(y)) / i32::from(x);
        if x < 0 {
            if y < 0 {
                // y/x > 0; atan2(y,x) = pi + atan(y/x)
                32768u16.wrapping_add(self.table_atan(r as u32))
            } else {
                // y/x <= 0; atan2(y,x) = -pi - atan(-y/x)
                32768u16.wrapping_sub(self.table_atan((-r) as u32))
            }
        } else if y < 0 {
            // y/x < 0; atan2(y,x) = -atan(-y/x)
            0u16.wrapping_sub(self.table_atan((-r) as u32))
        } else {
            // y/x >= 0
            self.table_atan(r as u32)
        }
    }
}

impl SampleConverter for Cs16HConverter {
    fn format(&self) -> SampleFormat {
        SampleFormat::Cs16H
    }

    fn convert_phase(&self, bytes: &[u8], out: &mut [u16]) {
        for (sample, out) in bytes.chunks_exact(4).zip(out.iter_mut()) {
            let i = i16::from_ne_bytes([sample[0], sample[1]]);
            let q = i16::from_ne_bytes([sample[2], sample[3]]);
            *out = self.table_atan2(q, i);
        }
    }

    fn convert_magsq(&self, bytes: &[u8], out: &mut [f64]) {
        for (sample, out) in bytes.chunks_exact(4).zip(out.iter_mut()) {
            let i = i16::from_ne_bytes([sample[0], sample[1]]);
            let q = i16::from_ne_bytes([sample[2], sample[3]]);
            *out = magsq(f64::from(i), f64::from(q)) / (32768.0 * 32768.0);
        }
    }
}

/// 32-bit float converter; no table, just the host atan2
struct Cf32HConverter;

impl SampleConverter for Cf32HConverter {
    fn format(&self) -> SampleFormat {
        SampleFormat::Cf32H
    }

    fn convert_phase(&self, bytes: &[u8], out: &mut [u16]) {
        for (sample, out) in bytes.chunks_exact(8).zip(out.iter_mut()) {
            let i = f32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]]);
            let q = f32::from_ne_bytes([sample[4], sample[5], sample[6], sample[7]]);
            *out = scaled_atan2(f64::from(q), f64::from(i));
        }
    }

    fn convert_magsq(&self, bytes: &[u8], out: &mut [f64]) {
        for (sample, out) in bytes.chunks_exact(8).zip(out.iter_mut()) {
            let i = f32::from_ne_bytes([sample[0], sample[1], sample[2], sample[3]]);
            let q = f32::from_ne_bytes([sample[4], sample[5], sample[6], sample[7]]);
            *out = magsq(f64::from(i), f64::from(q));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    // distance between two phase samples on the circle, in LSB
    fn phase_distance(a: u16, b: u16) -> u16 {
        let d = b.wrapping_sub(a);
        d.min(0u16.wrapping_sub(d))
    }

    #[test]
    fn test_format_names() {
        for name in ["CU8", "CS8", "CS16H", "CF32H"] {
            let format: SampleFormat = name.parse().expect("parse failure");
            assert_eq!(format.name(), name);
        }

        assert!("cu8".parse::<SampleFormat>().is_err());
        assert!("CS16".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(SampleFormat::Cu8.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::Cs8.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::Cs16H.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::Cf32H.bytes_per_sample(), 8);
    }

    #[test]
    fn test_cu8_table_matches_reference() {
        let uut = Cu8Converter::new();

        let mut phase = [0u16; 1];
        let mut mag = [0f64; 1];
        for i in 0u16..256 {
            for q in 0u16..256 {
                let bytes = [i as u8, q as u8];
                uut.convert_phase(&bytes, &mut phase);
                uut.convert_magsq(&bytes, &mut mag);

                let d_i = (f64::from(i) - 127.5) / 128.0;
                let d_q = (f64::from(q) - 127.5) / 128.0;
                assert_eq!(phase[0], scaled_atan2(d_q, d_i));
                assert_approx_eq!(mag[0], d_i * d_i + d_q * d_q);
                assert!(mag[0] <= 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn test_cs8_table_matches_reference() {
        let uut = Cs8Converter::new();

        let mut phase = [0u16; 1];
        for i in -128i16..=127 {
            for q in -128i16..=127 {
                let bytes = [i as u8, q as u8];
                uut.convert_phase(&bytes, &mut phase);
                assert_eq!(
                    phase[0],
                    scaled_atan2(f64::from(q) / 128.0, f64::from(i) / 128.0)
                );
            }
        }
    }

    #[test]
    fn test_cf32h_cardinal_angles() {
        let uut = Cf32HConverter;

        let cases: [(f32, f32, u16); 4] = [
            (1.0, 0.0, 0),
            (0.0, 1.0, 16384),
            (-1.0, 0.0, 32768),
            (0.0, -1.0, 49152),
        ];

        let mut out = [0u16; 1];
        for (i, q, want) in cases {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&i.to_ne_bytes());
            bytes.extend_from_slice(&q.to_ne_bytes());
            uut.convert_phase(&bytes, &mut out);
            assert!(
                phase_distance(out[0], want) <= 1,
                "atan2({q}, {i}): got {} want {want}",
                out[0]
            );
        }
    }

    #[test]
    fn test_cs16h_accuracy() {
        // 36 LSB is about 0.2 degrees
        const MAX_ERROR: u16 = 36;

        let uut = Cs16HConverter::new();

        let mut out = [0u16; 1];
        for x in (-32768i32..=32767).step_by(509) {
            for y in (-32768i32..=32767).step_by(523) {
                let mut bytes = Vec::new();
                bytes.extend_from_slice(&(x as i16).to_ne_bytes());
                bytes.extend_from_slice(&(y as i16).to_ne_bytes());
                uut.convert_phase(&bytes, &mut out);

                let want = scaled_atan2(f64::from(y), f64::from(x));
                assert!(
                    phase_distance(out[0], want) <= MAX_ERROR,
                    "atan2({y}, {x}): got {} want {want}",
                    out[0]
                );
            }
        }
    }

    #[test]
    fn test_cs16h_magsq_scaling() {
        let uut = Cs16HConverter::new();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&32767i16.to_ne_bytes());
        bytes.extend_from_slice(&0i16.to_ne_bytes());

        let mut out = [0f64; 1];
        uut.convert_magsq(&bytes, &mut out);
        assert_approx_eq!(out[0], (32767.0f64 * 32767.0) / (32768.0 * 32768.0));
    }

    #[test]
    fn test_partial_samples_ignored() {
        let uut = Cu8Converter::new();

        // three bytes is one whole CU8 sample plus a leftover byte
        let bytes = [200u8, 10, 99];
        let mut out = [0xffffu16; 2];
        uut.convert_phase(&bytes, &mut out[..1]);
        assert_eq!(out[1], 0xffff);
    }
}
