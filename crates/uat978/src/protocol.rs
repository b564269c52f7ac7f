//! UAT framing and FEC constants
//!
//! Bit-exact parameters of the 978 MHz UAT physical layer, per
//! DO-282B. Everything in the demodulator and FEC layers is derived
//! from these values.

/// Samples per second expected at the demodulator input
///
/// This is exactly twice the UAT bit rate of 1,041,666 bps.
pub const SAMPLES_PER_SECOND: u64 = 2_083_333;

/// Length of the sync word, in bits
pub const SYNC_BITS: usize = 36;

/// Sync word prefixed to every aircraft-to-ground frame
pub const DOWNLINK_SYNC_WORD: u64 = 0xEAC_DDA4E2;

/// Sync word prefixed to every ground-to-aircraft frame
pub const UPLINK_SYNC_WORD: u64 = 0x153_225B1D;

pub const DOWNLINK_SHORT_DATA_BITS: usize = 144;
pub const DOWNLINK_SHORT_DATA_BYTES: usize = DOWNLINK_SHORT_DATA_BITS / 8;
pub const DOWNLINK_SHORT_BITS: usize = DOWNLINK_SHORT_DATA_BITS + 96;
pub const DOWNLINK_SHORT_BYTES: usize = DOWNLINK_SHORT_BITS / 8;

pub const DOWNLINK_LONG_DATA_BITS: usize = 272;
pub const DOWNLINK_LONG_DATA_BYTES: usize = DOWNLINK_LONG_DATA_BITS / 8;
pub const DOWNLINK_LONG_BITS: usize = DOWNLINK_LONG_DATA_BITS + 112;
pub const DOWNLINK_LONG_BYTES: usize = DOWNLINK_LONG_BITS / 8;

pub const UPLINK_BLOCK_DATA_BITS: usize = 576;
pub const UPLINK_BLOCK_DATA_BYTES: usize = UPLINK_BLOCK_DATA_BITS / 8;
pub const UPLINK_BLOCK_BITS: usize = UPLINK_BLOCK_DATA_BITS + 160;
pub const UPLINK_BLOCK_BYTES: usize = UPLINK_BLOCK_BITS / 8;

pub const UPLINK_BLOCKS_PER_FRAME: usize = 6;
pub const UPLINK_DATA_BITS: usize = UPLINK_BLOCK_DATA_BITS * UPLINK_BLOCKS_PER_FRAME;
pub const UPLINK_DATA_BYTES: usize = UPLINK_DATA_BITS / 8;
pub const UPLINK_BITS: usize = UPLINK_BLOCK_BITS * UPLINK_BLOCKS_PER_FRAME;
pub const UPLINK_BYTES: usize = UPLINK_BITS / 8;

/// Reed-Solomon parameters
///
/// All three UAT codes share the same GF(256) field generator
/// (x⁸+x⁷+x²+x+1), first consecutive root, and primitive element; they
/// differ only in parity symbol count and shortening pad.
pub mod fec {
    /// GF(256) field generator polynomial
    pub const GF_POLY: u32 = 0x187;

    /// First consecutive root of the code generator polynomial
    pub const FCR: usize = 120;

    /// Primitive element index
    pub const PRIM: usize = 1;

    pub const DOWNLINK_SHORT_ROOTS: usize = 12;
    pub const DOWNLINK_LONG_ROOTS: usize = 14;
    pub const UPLINK_BLOCK_ROOTS: usize = 20;

    pub const DOWNLINK_SHORT_PAD: usize = 255 - super::DOWNLINK_SHORT_BYTES;
    pub const DOWNLINK_LONG_PAD: usize = 255 - super::DOWNLINK_LONG_BYTES;
    pub const UPLINK_BLOCK_PAD: usize = 255 - super::UPLINK_BLOCK_BYTES;
}
