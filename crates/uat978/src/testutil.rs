//! Shared helpers for synthesizing UAT frames in tests

use crate::fec::rs::ReedSolomon;
use crate::protocol::fec::{
    DOWNLINK_LONG_PAD, DOWNLINK_LONG_ROOTS, DOWNLINK_SHORT_PAD, DOWNLINK_SHORT_ROOTS, FCR,
    GF_POLY, PRIM, UPLINK_BLOCK_PAD, UPLINK_BLOCK_ROOTS,
};
use crate::protocol::*;

/// Encode 34 data bytes into a 48-byte long downlink frame
pub fn encode_downlink_long(data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len(), DOWNLINK_LONG_DATA_BYTES);
    let rs = ReedSolomon::new(GF_POLY, FCR, PRIM, DOWNLINK_LONG_ROOTS, DOWNLINK_LONG_PAD);
    let mut block = vec![0u8; DOWNLINK_LONG_BYTES];
    block[..data.len()].copy_from_slice(data);
    rs.encode(&mut block);
    block
}

/// Encode 18 data bytes into a 30-byte short downlink frame
pub fn encode_downlink_short(data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len(), DOWNLINK_SHORT_DATA_BYTES);
    let rs = ReedSolomon::new(
        GF_POLY,
        FCR,
        PRIM,
        DOWNLINK_SHORT_ROOTS,
        DOWNLINK_SHORT_PAD,
    );
    let mut block = vec![0u8; DOWNLINK_SHORT_BYTES];
    block[..data.len()].copy_from_slice(data);
    rs.encode(&mut block);
    block
}

/// Encode 432 data bytes into a 552-byte interleaved uplink frame
pub fn encode_uplink(data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len(), UPLINK_DATA_BYTES);
    let rs = ReedSolomon::new(GF_POLY, FCR, PRIM, UPLINK_BLOCK_ROOTS, UPLINK_BLOCK_PAD);

    let mut interleaved = vec![0u8; UPLINK_BYTES];
    for block in 0..UPLINK_BLOCKS_PER_FRAME {
        let mut blockdata = [0u8; UPLINK_BLOCK_BYTES];
        blockdata[..UPLINK_BLOCK_DATA_BYTES].copy_from_slice(
            &data[block * UPLINK_BLOCK_DATA_BYTES..(block + 1) * UPLINK_BLOCK_DATA_BYTES],
        );
        rs.encode(&mut blockdata);
        for (i, &sym) in blockdata.iter().enumerate() {
            interleaved[i * UPLINK_BLOCKS_PER_FRAME + block] = sym;
        }
    }
    interleaved
}

/// Bits of an on-air frame, MSB first: the 36 sync bits followed by
/// the frame bytes
pub fn frame_bits(sync_word: u64, frame: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(SYNC_BITS + frame.len() * 8);
    for i in (0..SYNC_BITS).rev() {
        bits.push(sync_word >> i & 1 != 0);
    }
    for &byte in frame {
        for i in (0..8).rev() {
            bits.push(byte >> i & 1 != 0);
        }
    }
    bits
}

/// Render bits as a phase sequence at two samples per bit
///
/// Each bit yields a pair of samples whose phase difference is
/// `+swing` for a one and `-swing` for a zero. The first sample of
/// every pair sits at a fixed reference angle, which keeps the
/// waveform simple without affecting the differential slicer.
pub fn phase_from_bits(bits: &[bool], swing: u16) -> Vec<u16> {
    let mut phase = Vec::with_capacity(bits.len() * 2);
    for &bit in bits {
        phase.push(32768);
        if bit {
            phase.push(32768u16.wrapping_add(swing));
        } else {
            phase.push(32768u16.wrapping_sub(swing));
        }
    }
    phase
}

/// Idle (all-zero-bit) padding samples
pub fn idle_phase(samples: usize) -> Vec<u16> {
    vec![32768u16; samples]
}

/// Convert a phase sequence to full-scale CU8 IQ bytes
pub fn cu8_from_phase(phase: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(phase.len() * 2);
    for &p in phase {
        let theta = f64::from(p) * std::f64::consts::PI / 32768.0;
        let i = (127.5 + 127.4 * theta.cos()).round() as u8;
        let q = (127.5 + 127.4 * theta.sin()).round() as u8;
        bytes.push(i);
        bytes.push(q);
    }
    bytes
}

/// A complete long downlink transmission rendered as phase samples
pub fn downlink_long_phase(data: &[u8], swing: u16) -> Vec<u16> {
    let frame = encode_downlink_long(data);
    phase_from_bits(&frame_bits(DOWNLINK_SYNC_WORD, &frame), swing)
}

/// A complete uplink transmission rendered as phase samples
pub fn uplink_phase(data: &[u8], swing: u16) -> Vec<u16> {
    let frame = encode_uplink(data);
    phase_from_bits(&frame_bits(UPLINK_SYNC_WORD, &frame), swing)
}
