//! SoapySDR sample source (feature `sdr`)
//!
//! A thin adapter over the vendor-neutral SoapySDR abstraction: the
//! device is tuned to 978 MHz at 2.083333 Msps, streamed as CS16, and
//! the reader thread hands timestamped byte buffers to the main loop.
//! PPM correction is applied by offsetting the tuned frequency.
//! Buffers that cannot be queued (a stalled main loop) are dropped and
//! counted, with a log line every 15 seconds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Sender, TrySendError};
use log::{info, warn};
use num_complex::Complex;
use soapysdr::Direction::Rx;

use uat978::protocol::SAMPLES_PER_SECOND;
use uat978::SampleFormat;

use crate::cli::SdrOptions;
use crate::source::{now_millis, SourceEvent};

const CENTER_FREQUENCY_HZ: f64 = 978_000_000.0;
const OVERFLOW_LOG_INTERVAL: Duration = Duration::from_secs(15);

// samples per stream read
const READ_SAMPLES: usize = 65_536;

/// The sample format an SDR source produces
pub fn sdr_sample_format() -> SampleFormat {
    SampleFormat::Cs16H
}

/// Stream samples from a SoapySDR device until halted
pub fn run_sdr_source(options: &SdrOptions, tx: &Sender<SourceEvent>, halt: &Arc<AtomicBool>) {
    if let Err(e) = stream_samples(options, tx, halt) {
        let _ = tx.send(SourceEvent::Error(e));
    }
}

fn stream_samples(
    options: &SdrOptions,
    tx: &Sender<SourceEvent>,
    halt: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let mut device_args = options.device.clone();
    if let Some(settings) = &options.device_settings {
        device_args.push(',');
        device_args.push_str(settings);
    }

    let device = soapysdr::Device::new(device_args.as_str())
        .with_context(|| format!("could not open SDR device \"{}\"", options.device))?;

    let frequency = match options.ppm {
        Some(ppm) => CENTER_FREQUENCY_HZ * (1.0 - ppm / 1e6),
        None => CENTER_FREQUENCY_HZ,
    };
    device
        .set_frequency(Rx, 0, frequency, ())
        .context("could not set frequency")?;
    device
        .set_sample_rate(Rx, 0, SAMPLES_PER_SECOND as f64)
        .context("could not set sample rate")?;

    if options.auto_gain {
        device
            .set_gain_mode(Rx, 0, true)
            .context("could not enable AGC")?;
    }
    if let Some(gain) = options.gain {
        device.set_gain(Rx, 0, gain).context("could not set gain")?;
    }
    if let Some(antenna) = &options.antenna {
        device
            .set_antenna(Rx, 0, antenna.as_str())
            .context("could not select antenna")?;
    }

    let mut stream = match &options.stream_settings {
        Some(settings) => device
            .rx_stream_args::<Complex<i16>, _>(&[0], settings.as_str())
            .context("could not open RX stream")?,
        None => device
            .rx_stream::<Complex<i16>>(&[0])
            .context("could not open RX stream")?,
    };
    stream.activate(None).context("could not activate stream")?;

    info!(
        "SDR streaming at {:.6} MHz, {} Sa/s",
        frequency / 1e6,
        SAMPLES_PER_SECOND
    );

    let mut buf = vec![Complex::<i16>::new(0, 0); READ_SAMPLES];
    let mut dropped: u64 = 0;
    let mut last_overflow_log = Instant::now();

    loop {
        if halt.load(Ordering::Relaxed) {
            break;
        }

        let n = match stream.read(&mut [&mut buf], 1_000_000) {
            Ok(n) => n,
            Err(e) if e.code == soapysdr::ErrorCode::Timeout => continue,
            Err(e) if e.code == soapysdr::ErrorCode::Overflow => {
                dropped += 1;
                continue;
            }
            Err(e) => {
                let _ = stream.deactivate(None);
                return Err(e).context("SDR stream read failed");
            }
        };

        let timestamp = now_millis().saturating_sub(n as u64 * 1000 / SAMPLES_PER_SECOND);
        let mut bytes = Vec::with_capacity(n * 4);
        for sample in &buf[..n] {
            bytes.extend_from_slice(&sample.re.to_ne_bytes());
            bytes.extend_from_slice(&sample.im.to_ne_bytes());
        }

        match tx.try_send(SourceEvent::Samples { timestamp, bytes }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => dropped += 1,
            Err(TrySendError::Disconnected(_)) => break,
        }

        if dropped > 0 && last_overflow_log.elapsed() >= OVERFLOW_LOG_INTERVAL {
            warn!("dropped {dropped} sample buffers (receiver backlog or SDR overflow)");
            dropped = 0;
            last_overflow_log = Instant::now();
        }
    }

    let _ = stream.deactivate(None);
    Ok(())
}
