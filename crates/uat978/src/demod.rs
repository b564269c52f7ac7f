//! Frame synchronization and bit recovery
//!
//! The demodulator expects phase samples at twice the UAT bit rate and
//! works on the phase difference between adjacent samples:
//!
//! ```txt
//!  sample 1 - sample 0   -> sync0
//!  sample 2 - sample 1   -> sync1
//!  sample 3 - sample 2   -> sync0
//!  sample 4 - sample 3   -> sync1
//! ```
//!
//! Hard bit decisions accumulate into the two shift registers `sync0`
//! and `sync1`, which are compared against the expected 36-bit sync
//! word at every probe position. A match tells us which sample to
//! start decoding from. Because a frame straddling the end of the
//! buffer must be findable on the next call, no frame is attempted
//! within the trailing reserve; the caller passes those samples back
//! at the start of the next invocation, and the demodulator itself
//! keeps no state between calls.

#[cfg(not(test))]
use log::debug;

#[cfg(test)]
use std::println as debug;

use crate::fec::Fec;
use crate::protocol::*;

/// Phase difference between two phase samples
///
/// The u16 phase encoding is modular, so wrapping subtraction followed
/// by a signed reinterpretation yields the difference as a small signed
/// angle in [-32768, 32767].
#[inline]
pub(crate) fn phase_difference(from: u16, to: u16) -> i16 {
    to.wrapping_sub(from) as i16
}

// Accept a sync word with up to 4 bit errors, giving up as soon as a
// fifth difference is seen.
#[inline]
fn sync_word_match(word: u64, expected: u64) -> bool {
    let mut diff = word ^ expected;
    for _ in 0..4 {
        if diff == 0 {
            return true;
        }
        diff &= diff - 1; // clear the lowest set bit
    }
    diff == 0
}

/// Bit-slicing threshold policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlicerPolicy {
    /// Slice at a phase difference of zero
    #[default]
    Fixed,

    /// Derive a per-frame slicing threshold from the sync word
    ///
    /// The mean phase differences of the sync word's one-bits and
    /// zero-bits are averaged into a center value, and the sync word
    /// is re-validated against that center before demodulation
    /// proceeds. Useful when the tuner leaves a DC offset on the
    /// discriminator output.
    AutoCenter,
}

/// One demodulated frame
///
/// `payload` holds the corrected data bytes with the FEC parity
/// removed; `sample_begin..sample_end` is the half-open range of phase
/// samples the frame occupied, including its sync word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub corrected_errors: usize,
    pub sample_begin: usize,
    pub sample_end: usize,
}

/// UAT demodulator for phase samples at 2.083333 Msps
pub struct Demodulator {
    fec: Fec,
    slicer: SlicerPolicy,
}

impl Demodulator {
    pub fn new(slicer: SlicerPolicy) -> Self {
        Self {
            fec: Fec::new(),
            slicer,
        }
    }

    /// Samples the caller must replay at the start of the next call
    ///
    /// No frame is emitted whose end would lie past
    /// `len - trailing_samples()`; a sync word inside that reserve is
    /// picked up on the next call instead, so a frame straddling two
    /// input chunks is found exactly once.
    pub fn trailing_samples(&self) -> usize {
        (SYNC_BITS + UPLINK_BITS) * 2
    }

    /// Demodulate every frame in `phase`
    ///
    /// Returns frames in the order their sync words occur. Frames
    /// starting within the trailing reserve are not attempted.
    pub fn demodulate(&self, phase: &[u16]) -> Vec<Frame> {
        let mut frames = Vec::new();

        let trailing = self.trailing_samples();
        if phase.len() < trailing {
            return frames;
        }
        let limit = phase.len() - trailing;

        const SYNC_MASK: u64 = (1u64 << SYNC_BITS) - 1;
        let mut sync_bits = 0usize;
        let mut sync0: u64 = 0;
        let mut sync1: u64 = 0;

        let mut probe = 0usize;
        while probe < limit {
            let d0 = phase_difference(phase[probe], phase[probe + 1]);
            let d1 = phase_difference(phase[probe + 1], phase[probe + 2]);

            sync0 = ((sync0 << 1) | u64::from(d0 > 0)) & SYNC_MASK;
            sync1 = ((sync1 << 1) | u64::from(d1 > 0)) & SYNC_MASK;

            sync_bits += 1;
            if sync_bits < SYNC_BITS {
                // haven't fully populated sync0/1 yet
                probe += 2;
                continue;
            }

            // When a sync word matches, demodulation is attempted both
            // at that alignment and one sample later, keeping whichever
            // corrects with fewer errors. A successful frame moves the
            // probe past its end and restarts sync accumulation.
            let sync_start = probe + 2 - SYNC_BITS * 2;

            if sync_word_match(sync0, DOWNLINK_SYNC_WORD) {
                if let Some(frame) = self.demod_best(phase, sync_start, true) {
                    probe = frame.sample_end;
                    sync_bits = 0;
                    frames.push(frame);
                    continue;
                }
            }

            if sync_word_match(sync1, DOWNLINK_SYNC_WORD) {
                if let Some(frame) = self.demod_best(phase, sync_start + 1, true) {
                    probe = frame.sample_end;
                    sync_bits = 0;
                    frames.push(frame);
                    continue;
                }
            }

            if sync_word_match(sync0, UPLINK_SYNC_WORD) {
                if let Some(frame) = self.demod_best(phase, sync_start, false) {
                    probe = frame.sample_end;
                    sync_bits = 0;
                    frames.push(frame);
                    continue;
                }
            }

            if sync_word_match(sync1, UPLINK_SYNC_WORD) {
                if let Some(frame) = self.demod_best(phase, sync_start + 1, false) {
                    probe = frame.sample_end;
                    sync_bits = 0;
                    frames.push(frame);
                    continue;
                }
            }

            probe += 2;
        }

        frames
    }

    // Demodulate at both the nominal sample and one sample later and
    // keep the attempt that corrected fewer errors.
    fn demod_best(&self, phase: &[u16], start: usize, downlink: bool) -> Option<Frame> {
        let attempt = |start| {
            if downlink {
                self.demod_one_downlink(phase, start)
            } else {
                self.demod_one_uplink(phase, start)
            }
        };

        let frame0 = attempt(start);
        let frame1 = attempt(start + 1);

        let errors0 = frame0.as_ref().map_or(usize::MAX, |f| f.corrected_errors);
        let errors1 = frame1.as_ref().map_or(usize::MAX, |f| f.corrected_errors);

        if errors0 <= errors1 {
            frame0
        } else {
            frame1
        }
    }

    fn demod_one_downlink(&self, phase: &[u16], start: usize) -> Option<Frame> {
        let (zero_slice, one_slice) = self.slices(phase, start, DOWNLINK_SYNC_WORD)?;

        let data = &phase[start + SYNC_BITS * 2..];
        let (raw, erasures) = demod_bits(data, DOWNLINK_LONG_BYTES, zero_slice, one_slice);

        let (corrected, errors) = self.fec.correct_downlink(&raw, &erasures)?;

        let bits = if corrected.len() == DOWNLINK_LONG_DATA_BYTES {
            DOWNLINK_LONG_BITS
        } else {
            DOWNLINK_SHORT_BITS
        };
        debug!(
            "downlink frame at sample {}: {} bytes, {} errors corrected",
            start,
            corrected.len(),
            errors
        );

        Some(Frame {
            payload: corrected,
            corrected_errors: errors,
            sample_begin: start,
            sample_end: start + (SYNC_BITS + bits) * 2,
        })
    }

    fn demod_one_uplink(&self, phase: &[u16], start: usize) -> Option<Frame> {
        let (zero_slice, one_slice) = self.slices(phase, start, UPLINK_SYNC_WORD)?;

        let data = &phase[start + SYNC_BITS * 2..];
        let (raw, erasures) = demod_bits(data, UPLINK_BYTES, zero_slice, one_slice);

        let (corrected, errors) = self.fec.correct_uplink(&raw, &erasures)?;

        debug!(
            "uplink frame at sample {}: {} errors corrected",
            start, errors
        );

        Some(Frame {
            payload: corrected,
            corrected_errors: errors,
            sample_begin: start,
            sample_end: start + (SYNC_BITS + UPLINK_BITS) * 2,
        })
    }

    // Slicing thresholds for a frame whose sync word begins at `start`.
    // Returns None if the policy rejects the sync word.
    fn slices(&self, phase: &[u16], start: usize, pattern: u64) -> Option<(i16, i16)> {
        match self.slicer {
            SlicerPolicy::Fixed => Some((0, 0)),
            SlicerPolicy::AutoCenter => {
                let center = check_sync_word(&phase[start..], pattern)?;
                Some((center, center))
            }
        }
    }
}

impl Default for Demodulator {
    fn default() -> Self {
        Self::new(SlicerPolicy::Fixed)
    }
}

// Verify the sync word at the start of `phase` against `pattern` and
// derive the bit slicing threshold from it: the mean dphi of the
// one-bits and of the zero-bits, averaged. Returns None if the sync
// word has more than 4 bit errors when re-sliced at that center.
fn check_sync_word(phase: &[u16], pattern: u64) -> Option<i16> {
    const MAX_SYNC_ERRORS: usize = 4;

    let mut dphi_zero_total: i32 = 0;
    let mut zero_bits: i32 = 0;
    let mut dphi_one_total: i32 = 0;
    let mut one_bits: i32 = 0;

    for i in 0..SYNC_BITS {
        let dphi = i32::from(phase_difference(phase[i * 2], phase[i * 2 + 1]));
        if pattern & (1 << (SYNC_BITS - 1 - i)) != 0 {
            one_bits += 1;
            dphi_one_total += dphi;
        } else {
            zero_bits += 1;
            dphi_zero_total += dphi;
        }
    }

    dphi_zero_total /= zero_bits;
    dphi_one_total /= one_bits;

    let center = ((dphi_one_total + dphi_zero_total) / 2) as i16;

    let mut error_bits = 0;
    for i in 0..SYNC_BITS {
        let dphi = phase_difference(phase[i * 2], phase[i * 2 + 1]);
        let want_one = pattern & (1 << (SYNC_BITS - 1 - i)) != 0;
        if want_one != (dphi > center) {
            error_bits += 1;
        }
    }

    (error_bits <= MAX_SYNC_ERRORS).then_some(center)
}

// Slice `nbytes` bytes of differentially-encoded bits from `phase`.
// Bit order is big-endian within each byte. A phase difference above
// `one_slice` reads as a one and at or below `zero_slice` as a zero;
// anything in between reads as a zero and marks the whole byte as an
// erasure. Erasure indices are returned in ascending order.
fn demod_bits(
    phase: &[u16],
    nbytes: usize,
    zero_slice: i16,
    one_slice: i16,
) -> (Vec<u8>, Vec<usize>) {
    let mut result = Vec::with_capacity(nbytes);
    let mut erasures = Vec::new();

    for (index, chunk) in phase.chunks_exact(16).take(nbytes).enumerate() {
        let mut byte = 0u8;
        let mut erasure = false;
        for bit in 0..8 {
            let dphi = phase_difference(chunk[bit * 2], chunk[bit * 2 + 1]);
            if dphi > one_slice {
                byte |= 0x80 >> bit;
            } else if dphi > zero_slice {
                erasure = true;
            }
        }
        result.push(byte);
        if erasure {
            erasures.push(index);
        }
    }

    (result, erasures)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::testutil::*;

    const SWING: u16 = 8192;

    fn long_payload(rng: &mut StdRng) -> Vec<u8> {
        let mut data: Vec<u8> = (0..DOWNLINK_LONG_DATA_BYTES).map(|_| rng.gen()).collect();
        data[0] |= 0x08; // long frame header
        data
    }

    // idle samples, then the frame, then enough idle to satisfy the
    // trailing reserve
    fn stream(lead_in: usize, frame_phase: &[u16]) -> Vec<u16> {
        let mut phase = idle_phase(lead_in);
        phase.extend_from_slice(frame_phase);
        phase.extend(idle_phase((SYNC_BITS + UPLINK_BITS) * 2 + 64));
        phase
    }

    #[test]
    fn test_phase_difference() {
        assert_eq!(phase_difference(0, 1), 1);
        assert_eq!(phase_difference(1, 0), -1);
        assert_eq!(phase_difference(65535, 0), 1);
        assert_eq!(phase_difference(0, 65535), -1);
        assert_eq!(phase_difference(0, 32767), 32767);
        assert_eq!(phase_difference(0, 32768), -32768);

        // reference formula from the phase-sample invariant
        for (a, b) in [(0u16, 40000u16), (40000, 0), (12345, 54321), (7, 7)] {
            let want = ((i32::from(b) - i32::from(a) + 32768).rem_euclid(65536)) - 32768;
            assert_eq!(i32::from(phase_difference(a, b)), want);
        }
    }

    #[test]
    fn test_sync_word_match() {
        assert!(sync_word_match(DOWNLINK_SYNC_WORD, DOWNLINK_SYNC_WORD));

        let mut word = DOWNLINK_SYNC_WORD;
        for flipped in 1..=5 {
            word ^= 1 << (flipped * 3);
            assert_eq!(sync_word_match(word, DOWNLINK_SYNC_WORD), flipped <= 4);
        }
    }

    #[test]
    fn test_clean_long_downlink() {
        let mut rng = StdRng::seed_from_u64(20);
        let data = long_payload(&mut rng);
        let phase = stream(400, &downlink_long_phase(&data, SWING));

        let frames = Demodulator::default().demodulate(&phase);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, data);
        assert_eq!(frames[0].corrected_errors, 0);
        assert_eq!(frames[0].sample_begin, 400);
        assert_eq!(
            frames[0].sample_end,
            400 + (SYNC_BITS + DOWNLINK_LONG_BITS) * 2
        );
    }

    #[test]
    fn test_frame_at_buffer_start() {
        let mut rng = StdRng::seed_from_u64(21);
        let data = long_payload(&mut rng);
        let phase = stream(0, &downlink_long_phase(&data, SWING));

        let frames = Demodulator::default().demodulate(&phase);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sample_begin, 0);
    }

    #[test]
    fn test_sync_bit_error_limits() {
        let mut rng = StdRng::seed_from_u64(22);
        let data = long_payload(&mut rng);

        for (errors, expect_frame) in [(4usize, true), (5, false)] {
            let frame = encode_downlink_long(&data);
            let mut bits = frame_bits(DOWNLINK_SYNC_WORD, &frame);
            for i in 0..errors {
                // spread the errors over the sync word
                bits[i * 7] = !bits[i * 7];
            }
            let phase = stream(200, &phase_from_bits(&bits, SWING));

            let frames = Demodulator::default().demodulate(&phase);
            assert_eq!(
                frames.len(),
                usize::from(expect_frame),
                "{errors} sync bit errors"
            );
        }
    }

    #[test]
    fn test_downlink_symbol_errors_corrected() {
        let mut rng = StdRng::seed_from_u64(23);
        let data = long_payload(&mut rng);

        let mut frame = encode_downlink_long(&data);
        frame[5] ^= 0xff;
        frame[29] ^= 0x10;
        let phase = stream(150, &phase_from_bits(&frame_bits(DOWNLINK_SYNC_WORD, &frame), SWING));

        let frames = Demodulator::default().demodulate(&phase);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, data);
        assert_eq!(frames[0].corrected_errors, 2);
    }

    #[test]
    fn test_downlink_too_many_errors() {
        let mut rng = StdRng::seed_from_u64(24);
        let data = long_payload(&mut rng);

        let mut frame = encode_downlink_long(&data);
        for i in 0..8 {
            frame[2 + i * 4] ^= 0xa5;
        }
        let phase = stream(150, &phase_from_bits(&frame_bits(DOWNLINK_SYNC_WORD, &frame), SWING));

        assert!(Demodulator::default().demodulate(&phase).is_empty());
    }

    #[test]
    fn test_uplink_with_errors() {
        let mut rng = StdRng::seed_from_u64(25);
        let data: Vec<u8> = (0..UPLINK_DATA_BYTES).map(|_| rng.gen()).collect();

        let mut frame = encode_uplink(&data);
        // three symbol errors in each of the six interleaved blocks
        for block in 0..UPLINK_BLOCKS_PER_FRAME {
            for k in 0..3 {
                frame[(5 + 9 * k) * UPLINK_BLOCKS_PER_FRAME + block] ^= 0x66;
            }
        }
        let phase = stream(80, &phase_from_bits(&frame_bits(UPLINK_SYNC_WORD, &frame), SWING));

        let frames = Demodulator::default().demodulate(&phase);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, data);
        assert_eq!(frames[0].corrected_errors, 18);
        assert_eq!(
            frames[0].sample_end - frames[0].sample_begin,
            (SYNC_BITS + UPLINK_BITS) * 2
        );
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut rng = StdRng::seed_from_u64(26);
        let first = long_payload(&mut rng);
        let second = long_payload(&mut rng);

        let mut phase = idle_phase(100);
        phase.extend(downlink_long_phase(&first, SWING));
        let second_begin = phase.len();
        phase.extend(downlink_long_phase(&second, SWING));
        phase.extend(idle_phase((SYNC_BITS + UPLINK_BITS) * 2 + 64));

        let frames = Demodulator::default().demodulate(&phase);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, first);
        assert_eq!(frames[0].sample_begin, 100);
        assert_eq!(frames[1].payload, second);
        assert_eq!(frames[1].sample_begin, second_begin);
    }

    #[test]
    fn test_no_frame_inside_trailing_reserve() {
        let mut rng = StdRng::seed_from_u64(27);
        let data = long_payload(&mut rng);

        // the frame itself is intact, but its sync word completes past
        // the probe limit; it must be left for the next call
        let mut phase = idle_phase(300);
        phase.extend(downlink_long_phase(&data, SWING));
        phase.extend(idle_phase(8000));
        assert!(phase.len() >= (SYNC_BITS + UPLINK_BITS) * 2);
        assert!(phase.len() - (SYNC_BITS + UPLINK_BITS) * 2 < 300 + SYNC_BITS * 2);

        assert!(Demodulator::default().demodulate(&phase).is_empty());
    }

    #[test]
    fn test_auto_center_slicer() {
        let mut rng = StdRng::seed_from_u64(28);
        let data = long_payload(&mut rng);

        // a DC offset pushes the payload zero-bits above zero while
        // the sync word's zero-bits stay just below it, so the sync
        // registers still match. A fixed threshold then reads every
        // payload bit as a one; the auto-centered threshold derived
        // from the sync word slices the payload correctly.
        let frame = encode_downlink_long(&data);
        let bits = frame_bits(DOWNLINK_SYNC_WORD, &frame);
        let mut phase = Vec::with_capacity(bits.len() * 2);
        for (i, &bit) in bits.iter().enumerate() {
            phase.push(32768);
            let dphi: u16 = match (i < SYNC_BITS, bit) {
                (_, true) => 9000,
                (true, false) => 0u16.wrapping_sub(200),
                (false, false) => 1000,
            };
            phase.push(32768u16.wrapping_add(dphi));
        }
        let phase = stream(120, &phase);

        assert!(Demodulator::default().demodulate(&phase).is_empty());

        let frames = Demodulator::new(SlicerPolicy::AutoCenter).demodulate(&phase);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, data);
    }

    #[test]
    fn test_erasure_marking() {
        // a dphi between the two thresholds reads as zero and marks
        // the byte erased
        let bits = [true, false, true, true, false, false, true, false];
        let mut phase = Vec::new();
        for (i, &bit) in bits.iter().enumerate() {
            phase.push(32768);
            let dphi: u16 = if i == 3 {
                100 // inside the erasure window
            } else if bit {
                8000
            } else {
                0u16.wrapping_sub(8000)
            };
            phase.push(32768u16.wrapping_add(dphi));
        }

        let (bytes, erasures) = demod_bits(&phase, 1, -500, 500);
        assert_eq!(bytes, vec![0b1010_0010]);
        assert_eq!(erasures, vec![0]);
    }
}
