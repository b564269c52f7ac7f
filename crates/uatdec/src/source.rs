//! Sample sources
//!
//! Each source runs on its own thread and hands `(timestamp, bytes)`
//! buffers — or already-assembled messages — to the main loop over a
//! bounded channel. Sources stop when the halt flag is raised or when
//! the main loop goes away and the channel send fails.

use std::fs::File;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::Sender;
use log::info;

use uat978::protocol::SAMPLES_PER_SECOND;
use uat978::{RawMessage, SampleFormat};

/// Samples per source block
pub const SAMPLES_PER_BLOCK: usize = 524_288;

/// One event from a source thread
pub enum SourceEvent {
    /// A block of raw IQ bytes; the timestamp (ms since the Unix
    /// epoch) is for the first sample in the block
    Samples { timestamp: u64, bytes: Vec<u8> },

    /// Messages from a source that demodulates in hardware
    Messages(Vec<RawMessage>),

    /// The source is exhausted; a normal exit
    Eof,

    /// The source failed
    Error(anyhow::Error),
}

/// Current wall clock, milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

fn halted(halt: &AtomicBool) -> bool {
    halt.load(Ordering::Relaxed)
}

// send, treating a gone receiver like a halt
fn send(tx: &Sender<SourceEvent>, event: SourceEvent) -> bool {
    tx.send(event).is_ok()
}

/// Read IQ blocks from a file
///
/// File sources always use synthetic timestamps, starting at 1 ms and
/// advancing with the sample count, so the derived message timestamps
/// are stable across runs. With `throttle`, reads are paced to the
/// realtime rate of the sample stream.
pub fn run_file_source(
    path: &std::path::Path,
    format: SampleFormat,
    throttle: bool,
    tx: &Sender<SourceEvent>,
    halt: &Arc<AtomicBool>,
) {
    let bytes_per_sample = format.bytes_per_sample();
    let block_bytes = SAMPLES_PER_BLOCK * bytes_per_sample;
    let bytes_per_second = SAMPLES_PER_SECOND * bytes_per_sample as u64;

    let mut file = match File::open(path).with_context(|| format!("unable to open {path:?}")) {
        Ok(file) => file,
        Err(e) => {
            send(tx, SourceEvent::Error(e));
            return;
        }
    };

    info!("reading {} samples from {path:?}", format);

    let mut timestamp = 1u64;
    let mut next_block = Instant::now();
    let mut block = vec![0u8; block_bytes];

    loop {
        if halted(halt) {
            return;
        }

        let used = match read_block(&mut file, &mut block) {
            Ok(used) => used,
            Err(e) => {
                send(tx, SourceEvent::Error(e.into()));
                return;
            }
        };

        // trailing partial samples of a truncated file are dropped
        let aligned = used - used % bytes_per_sample;
        if aligned > 0 {
            let event = SourceEvent::Samples {
                timestamp,
                bytes: block[..aligned].to_vec(),
            };
            if !send(tx, event) {
                return;
            }
            timestamp += aligned as u64 * 1000 / bytes_per_second;
        }

        if used < block.len() {
            // end of file
            send(tx, SourceEvent::Eof);
            return;
        }

        if throttle {
            next_block += Duration::from_nanos(aligned as u64 * 1_000_000_000 / bytes_per_second);
            let now = Instant::now();
            if next_block > now {
                std::thread::sleep(next_block - now);
            }
        }
    }
}

// fill `block` as far as the reader allows; Ok(n) < block.len() means EOF
fn read_block(reader: &mut impl Read, block: &mut [u8]) -> std::io::Result<usize> {
    let mut used = 0;
    while used < block.len() {
        match reader.read(&mut block[used..]) {
            Ok(0) => break,
            Ok(n) => used += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(used)
}

/// Read IQ blocks from stdin
///
/// Timestamps are wall clock, back-dated by the duration of each
/// block. Reads need not be sample-aligned; trailing partial samples
/// carry over into the next block.
pub fn run_stdin_source(format: SampleFormat, tx: &Sender<SourceEvent>, halt: &Arc<AtomicBool>) {
    let bytes_per_sample = format.bytes_per_sample();

    info!("reading {} samples from stdin", format);

    let stdin = std::io::stdin();
    let mut stdin = stdin.lock();
    let mut block = vec![0u8; SAMPLES_PER_BLOCK * bytes_per_sample];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        if halted(halt) {
            return;
        }

        match stdin.read(&mut block) {
            Ok(0) => {
                send(tx, SourceEvent::Eof);
                return;
            }
            Ok(n) => {
                pending.extend_from_slice(&block[..n]);
                let aligned = pending.len() - pending.len() % bytes_per_sample;
                if aligned == 0 {
                    continue;
                }

                let samples = (aligned / bytes_per_sample) as u64;
                let timestamp = now_millis().saturating_sub(samples * 1000 / SAMPLES_PER_SECOND);

                let bytes: Vec<u8> = pending.drain(..aligned).collect();
                if !send(tx, SourceEvent::Samples { timestamp, bytes }) {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                send(tx, SourceEvent::Error(e.into()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_block_partial() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = &data[..];
        let mut block = [0u8; 8];
        assert_eq!(read_block(&mut reader, &mut block).expect("read failure"), 5);
        assert_eq!(&block[..5], &data);
    }

    #[test]
    fn test_file_source_blocks_and_eof() {
        use std::io::Write;

        // 3 CU8 samples plus one trailing partial byte
        let dir = std::env::temp_dir().join("uatdec-source-test");
        std::fs::create_dir_all(&dir).expect("mkdir failure");
        let path = dir.join("samples.cu8");
        let mut file = File::create(&path).expect("create failure");
        file.write_all(&[10, 20, 30, 40, 50, 60, 70]).expect("write failure");
        drop(file);

        let (tx, rx) = crossbeam_channel::bounded(4);
        let halt = Arc::new(AtomicBool::new(false));
        run_file_source(&path, SampleFormat::Cu8, false, &tx, &halt);

        match rx.recv().expect("recv failure") {
            SourceEvent::Samples { timestamp, bytes } => {
                assert_eq!(timestamp, 1);
                assert_eq!(bytes, vec![10, 20, 30, 40, 50, 60]);
            }
            _ => panic!("expected samples"),
        }
        assert!(matches!(rx.recv().expect("recv failure"), SourceEvent::Eof));
    }
}
