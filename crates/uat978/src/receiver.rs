//! Streaming receiver
//!
//! The [`Receiver`] owns the sample-to-message pipeline: it keeps a
//! rolling byte buffer of raw samples, converts them to phase, runs
//! the demodulator, and turns each demodulated frame into a
//! [`RawMessage`] with RSSI and a per-frame timestamp. The trailing
//! samples of every chunk are preserved and replayed at the start of
//! the next call, so a frame that straddles two chunks is still
//! demodulated, exactly once.

#[cfg(not(test))]
use log::debug;

#[cfg(test)]
use std::println as debug;

use crate::convert::{converter_for, SampleConverter, SampleFormat};
use crate::demod::{Demodulator, SlicerPolicy};
use crate::message::RawMessage;
use crate::protocol::SAMPLES_PER_SECOND;

/// Configures and builds a [`Receiver`]
///
/// ```
/// use uat978::{ReceiverBuilder, SampleFormat, SlicerPolicy};
///
/// let rx = ReceiverBuilder::new(SampleFormat::Cs16H)
///     .with_slicer(SlicerPolicy::AutoCenter)
///     .build();
/// assert_eq!(rx.format(), SampleFormat::Cs16H);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct ReceiverBuilder {
    format: SampleFormat,
    slicer: SlicerPolicy,
}

impl ReceiverBuilder {
    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            slicer: SlicerPolicy::default(),
        }
    }

    /// Select the bit-slicing threshold policy
    pub fn with_slicer(mut self, slicer: SlicerPolicy) -> Self {
        self.slicer = slicer;
        self
    }

    pub fn build(self) -> Receiver {
        Receiver {
            converter: converter_for(self.format),
            demodulator: Demodulator::new(self.slicer),
            samples: Vec::new(),
            phase: Vec::new(),
            magsq: Vec::new(),
            saved_samples: 0,
        }
    }
}

/// Stateful sample-to-message pipeline
pub struct Receiver {
    converter: Box<dyn SampleConverter>,
    demodulator: Demodulator,
    samples: Vec<u8>,
    phase: Vec<u16>,
    magsq: Vec<f64>,
    saved_samples: usize,
}

impl Receiver {
    /// The sample format this receiver consumes
    pub fn format(&self) -> SampleFormat {
        self.converter.format()
    }

    /// Process one chunk of raw IQ bytes
    ///
    /// `timestamp` is the reception time of the first sample in
    /// `buffer`, in milliseconds since the Unix epoch. The buffer
    /// length must be a multiple of the sample size. Returns the
    /// messages demodulated from this chunk, in order; each message's
    /// timestamp is derived from the chunk timestamp and the frame's
    /// position within the rolling sample buffer.
    pub fn handle_samples(&mut self, timestamp: u64, buffer: &[u8]) -> Vec<RawMessage> {
        let bps = self.converter.bytes_per_sample();
        debug_assert_eq!(buffer.len() % bps, 0);

        let buffer_samples = buffer.len() / bps;
        let previous_samples = self.saved_samples;
        let previous_bytes = previous_samples * bps;

        let total_samples = buffer_samples + previous_samples;
        let total_bytes = total_samples * bps;

        if self.samples.len() < total_bytes {
            self.samples.resize(total_bytes, 0);
        }
        self.samples[previous_bytes..total_bytes].copy_from_slice(&buffer[..buffer_samples * bps]);

        if self.phase.len() < total_samples {
            self.phase.resize(total_samples, 0);
        }
        self.converter
            .convert_phase(&self.samples[..total_bytes], &mut self.phase[..total_samples]);

        let frames = self.demodulator.demodulate(&self.phase[..total_samples]);

        let mut messages = Vec::with_capacity(frames.len());
        for frame in frames {
            let n = frame.sample_end - frame.sample_begin;
            self.magsq.clear();
            self.magsq.resize(n, 0.0);
            self.converter.convert_magsq(
                &self.samples[frame.sample_begin * bps..frame.sample_end * bps],
                &mut self.magsq,
            );

            let total_power: f64 = self.magsq.iter().sum();
            let rssi = rssi_dbfs(total_power, n);

            let message_timestamp = timestamp
                .saturating_add(1000 * frame.sample_begin as u64 / SAMPLES_PER_SECOND)
                .saturating_sub(1000 * previous_samples as u64 / SAMPLES_PER_SECOND);

            let message = RawMessage::from_payload(
                frame.payload,
                message_timestamp,
                frame.corrected_errors as u32,
                rssi,
                None,
            )
            .expect("demodulator produced an unrecognized payload length");
            messages.push(message);
        }

        // preserve the tail of the sample buffer for next time
        let tail = self.demodulator.trailing_samples();
        if total_samples > tail {
            self.samples.copy_within(total_bytes - tail * bps..total_bytes, 0);
            self.saved_samples = tail;
        } else {
            self.saved_samples = total_samples;
        }

        if !messages.is_empty() {
            debug!("chunk of {buffer_samples} samples: {} messages", messages.len());
        }

        messages
    }
}

// Signal strength relative to a full-scale sample, in dB
fn rssi_dbfs(total_power: f64, samples: usize) -> f32 {
    if total_power == 0.0 {
        -1000.0
    } else {
        (10.0 * (total_power / samples as f64).log10()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::protocol::*;
    use crate::testutil::*;

    const SWING: u16 = 8192;

    fn long_payload(rng: &mut StdRng) -> Vec<u8> {
        let mut data: Vec<u8> = (0..DOWNLINK_LONG_DATA_BYTES).map(|_| rng.gen()).collect();
        data[0] |= 0x08;
        data
    }

    // CU8 stream: lead_in idle samples, the frame, then idle padding
    fn cu8_stream(lead_in: usize, frame_phase: &[u16], tail: usize) -> Vec<u8> {
        let mut phase = idle_phase(lead_in);
        phase.extend_from_slice(frame_phase);
        phase.extend(idle_phase(tail));
        cu8_from_phase(&phase)
    }

    #[test]
    fn test_rssi_dbfs() {
        assert_eq!(rssi_dbfs(0.0, 100), -1000.0);
        assert_eq!(rssi_dbfs(100.0, 100), 0.0);
        assert!((rssi_dbfs(10.0, 100) - -10.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_frame_clean() {
        let mut rng = StdRng::seed_from_u64(40);
        let data = long_payload(&mut rng);
        let bytes = cu8_stream(
            500,
            &downlink_long_phase(&data, SWING),
            (SYNC_BITS + UPLINK_BITS) * 2 + 100,
        );

        let chunk_timestamp = 1_600_000_000_000;
        let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
        let messages = rx.handle_samples(chunk_timestamp, &bytes);

        assert_eq!(messages.len(), 1);
        let burst = match &messages[0] {
            RawMessage::DownlinkLong(b) => b,
            other => panic!("unexpected message {other:?}"),
        };
        assert_eq!(burst.payload, data);
        assert_eq!(burst.errors, 0);

        // full-scale CU8 input sits a hair under 0 dBFS
        assert!(burst.rssi <= 0.0 && burst.rssi > -0.5, "rssi {}", burst.rssi);

        // frame begins 500 samples into the first chunk
        assert_eq!(
            burst.received_at,
            chunk_timestamp + 1000 * 500 / SAMPLES_PER_SECOND
        );
    }

    #[test]
    fn test_frame_with_symbol_errors() {
        let mut rng = StdRng::seed_from_u64(41);
        let data = long_payload(&mut rng);

        let mut frame = encode_downlink_long(&data);
        frame[7] ^= 0x24;
        frame[31] ^= 0x81;
        let phase = phase_from_bits(&frame_bits(DOWNLINK_SYNC_WORD, &frame), SWING);
        let bytes = cu8_stream(200, &phase, (SYNC_BITS + UPLINK_BITS) * 2 + 100);

        let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
        let messages = rx.handle_samples(1, &bytes);
        assert_eq!(messages.len(), 1);
        let burst = messages[0].burst().expect("expected burst");
        assert_eq!(burst.errors, 2);
        assert_eq!(burst.payload, data);
    }

    #[test]
    fn test_frame_straddles_chunks() {
        let mut rng = StdRng::seed_from_u64(42);
        let data = long_payload(&mut rng);
        let bytes = cu8_stream(
            600,
            &downlink_long_phase(&data, SWING),
            (SYNC_BITS + UPLINK_BITS) * 2 + 200,
        );

        // split mid-frame: byte offset of sample 700 (inside the sync)
        let split = 700 * 2;
        let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
        let first = rx.handle_samples(1, &bytes[..split]);
        assert!(first.is_empty());
        let second = rx.handle_samples(2, &bytes[split..]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].burst().expect("expected burst").payload, data);
    }

    #[test]
    fn test_split_invariance() {
        let mut rng = StdRng::seed_from_u64(43);
        let data = long_payload(&mut rng);
        let bytes = cu8_stream(
            900,
            &downlink_long_phase(&data, SWING),
            (SYNC_BITS + UPLINK_BITS) * 2 + 500,
        );

        let chunk_timestamp = 1_700_000_000_000u64;
        let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
        let reference = rx.handle_samples(chunk_timestamp, &bytes);
        assert_eq!(reference.len(), 1);
        let reference = reference[0].burst().expect("expected burst").clone();

        let total_samples = bytes.len() / 2;
        for split_sample in (1..total_samples).step_by(3) {
            let split = split_sample * 2;
            let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();

            // the second chunk's timestamp is where the clock would be
            // after the first chunk
            let second_timestamp =
                chunk_timestamp + 1000 * split_sample as u64 / SAMPLES_PER_SECOND;

            let mut messages = rx.handle_samples(chunk_timestamp, &bytes[..split]);
            messages.extend(rx.handle_samples(second_timestamp, &bytes[split..]));

            assert_eq!(messages.len(), 1, "split at sample {split_sample}");
            let burst = messages[0].burst().expect("expected burst");
            assert_eq!(burst.payload, reference.payload, "split at {split_sample}");
            assert_eq!(burst.errors, reference.errors);

            // timestamp may wobble by a millisecond from integer
            // division in the per-chunk arithmetic
            let delta = burst.received_at.abs_diff(reference.received_at);
            assert!(delta <= 1, "split at {split_sample}: timestamp off by {delta}");
        }
    }

    #[test]
    fn test_sync_at_chunk_start() {
        let mut rng = StdRng::seed_from_u64(44);
        let data = long_payload(&mut rng);
        let bytes = cu8_stream(
            0,
            &downlink_long_phase(&data, SWING),
            (SYNC_BITS + UPLINK_BITS) * 2 + 100,
        );

        let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
        let messages = rx.handle_samples(1, &bytes);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_uplink_end_to_end() {
        let mut rng = StdRng::seed_from_u64(45);
        let data: Vec<u8> = (0..UPLINK_DATA_BYTES).map(|_| rng.gen()).collect();
        let bytes = cu8_stream(
            300,
            &uplink_phase(&data, SWING),
            (SYNC_BITS + UPLINK_BITS) * 2 + 100,
        );

        let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
        let messages = rx.handle_samples(1, &bytes);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], RawMessage::Uplink(_)));
        assert_eq!(messages[0].burst().expect("expected burst").payload, data);
    }

    #[test]
    fn test_tail_never_exceeds_reserve() {
        let mut rx = ReceiverBuilder::new(SampleFormat::Cu8).build();
        let reserve = (SYNC_BITS + UPLINK_BITS) * 2;

        // short chunks accumulate until the reserve is reached
        let quiet = cu8_from_phase(&idle_phase(1000));
        for _ in 0..20 {
            rx.handle_samples(1, &quiet);
            assert!(rx.saved_samples <= reserve);
        }
        assert_eq!(rx.saved_samples, reserve);
    }
}
