//! Deinterleaving and error correction of UAT frames
//!
//! UAT uses three shortened Reed-Solomon codes: one each for the two
//! downlink frame lengths and one for uplink blocks. Downlink frames
//! are decoded with a two-try policy, since a receiver cannot know the
//! frame length before correction succeeds. Uplink frames carry six
//! byte-interleaved blocks that are corrected independently.

pub(crate) mod rs;

use arrayvec::ArrayVec;

use crate::protocol::fec::{
    DOWNLINK_LONG_PAD, DOWNLINK_LONG_ROOTS, DOWNLINK_SHORT_PAD, DOWNLINK_SHORT_ROOTS, FCR,
    GF_POLY, PRIM, UPLINK_BLOCK_PAD, UPLINK_BLOCK_ROOTS,
};
use crate::protocol::{
    DOWNLINK_LONG_BYTES, DOWNLINK_LONG_DATA_BYTES, DOWNLINK_SHORT_BYTES,
    DOWNLINK_SHORT_DATA_BYTES, UPLINK_BLOCKS_PER_FRAME, UPLINK_BLOCK_BYTES,
    UPLINK_BLOCK_DATA_BYTES, UPLINK_BYTES, UPLINK_DATA_BYTES,
};

use self::rs::ReedSolomon;

/// Error correction for demodulated UAT frames
pub struct Fec {
    downlink_short: ReedSolomon,
    downlink_long: ReedSolomon,
    uplink: ReedSolomon,
}

impl Fec {
    pub fn new() -> Self {
        Self {
            downlink_short: ReedSolomon::new(
                GF_POLY,
                FCR,
                PRIM,
                DOWNLINK_SHORT_ROOTS,
                DOWNLINK_SHORT_PAD,
            ),
            downlink_long: ReedSolomon::new(
                GF_POLY,
                FCR,
                PRIM,
                DOWNLINK_LONG_ROOTS,
                DOWNLINK_LONG_PAD,
            ),
            uplink: ReedSolomon::new(GF_POLY, FCR, PRIM, UPLINK_BLOCK_ROOTS, UPLINK_BLOCK_PAD),
        }
    }

    /// Correct a demodulated downlink frame
    ///
    /// `raw` holds [`DOWNLINK_LONG_BYTES`] of demodulated data;
    /// `erasures` optionally marks unreliable byte positions within it.
    /// The frame is decoded as a long frame first. The first five
    /// payload bits encode the payload type, and type 0 is reserved
    /// for short frames, so the header distinguishes the two codes'
    /// overlapping decoding space: a "successful" long decode whose
    /// header says short is discarded and the raw data is retried
    /// against the short code, keeping only erasures that lie within
    /// the short frame.
    ///
    /// On success, returns the corrected data bytes
    /// ([`DOWNLINK_SHORT_DATA_BYTES`] or [`DOWNLINK_LONG_DATA_BYTES`]
    /// of them) and the number of corrected symbols.
    pub fn correct_downlink(
        &self,
        raw: &[u8],
        erasures: &[usize],
    ) -> Option<(Vec<u8>, usize)> {
        if raw.len() != DOWNLINK_LONG_BYTES {
            return None;
        }
        if erasures.len() > DOWNLINK_LONG_ROOTS {
            return None;
        }

        // try decoding as a long frame
        let mut corrected = raw.to_vec();
        let mut long_erasures = ArrayVec::<usize, DOWNLINK_LONG_ROOTS>::new();
        for &e in erasures {
            long_erasures.push(e + DOWNLINK_LONG_PAD);
            corrected[e] = 0;
        }

        if let Some(n_corrected) = self.downlink_long.decode(&mut corrected, &long_erasures) {
            if corrected[0] >> 3 != 0 {
                corrected.truncate(DOWNLINK_LONG_DATA_BYTES);
                return Some((corrected, n_corrected));
            }
        }

        // retry against the short code, from the raw data again, with
        // only the erasures that lie within the short frame
        let mut corrected = raw[..DOWNLINK_SHORT_BYTES].to_vec();
        let mut short_erasures = ArrayVec::<usize, DOWNLINK_SHORT_ROOTS>::new();
        for &e in erasures {
            if e < DOWNLINK_SHORT_BYTES {
                if short_erasures.try_push(e + DOWNLINK_SHORT_PAD).is_err() {
                    // too many
                    return None;
                }
                corrected[e] = 0;
            }
        }

        if let Some(n_corrected) = self.downlink_short.decode(&mut corrected, &short_erasures) {
            if corrected[0] >> 3 == 0 {
                corrected.truncate(DOWNLINK_SHORT_DATA_BYTES);
                return Some((corrected, n_corrected));
            }
        }

        None
    }

    /// Correct a demodulated uplink frame
    ///
    /// `raw` holds [`UPLINK_BYTES`] of demodulated data: six 92-byte
    /// blocks interleaved byte-wise. Each block is deinterleaved and
    /// corrected independently; a single uncorrectable block fails the
    /// whole frame. On success, returns the concatenated data halves
    /// ([`UPLINK_DATA_BYTES`] bytes) and the total number of corrected
    /// symbols across all blocks.
    pub fn correct_uplink(&self, raw: &[u8], erasures: &[usize]) -> Option<(Vec<u8>, usize)> {
        if raw.len() != UPLINK_BYTES {
            return None;
        }

        let mut corrected = Vec::with_capacity(UPLINK_DATA_BYTES);
        let mut blockdata = [0u8; UPLINK_BLOCK_BYTES];
        let mut total_errors = 0;

        for block in 0..UPLINK_BLOCKS_PER_FRAME {
            for (i, sym) in blockdata.iter_mut().enumerate() {
                *sym = raw[i * UPLINK_BLOCKS_PER_FRAME + block];
            }

            let mut block_erasures = ArrayVec::<usize, UPLINK_BLOCK_ROOTS>::new();
            for &index in erasures {
                if index % UPLINK_BLOCKS_PER_FRAME == block {
                    let biased = index / UPLINK_BLOCKS_PER_FRAME + UPLINK_BLOCK_PAD;
                    if block_erasures.try_push(biased).is_err() {
                        // too many erasures in this block
                        return None;
                    }
                }
            }

            let n_corrected = self.uplink.decode(&mut blockdata, &block_erasures)?;
            total_errors += n_corrected;

            corrected.extend_from_slice(&blockdata[..UPLINK_BLOCK_DATA_BYTES]);
        }

        Some((corrected, total_errors))
    }
}

impl Default for Fec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::testutil::{encode_downlink_long, encode_downlink_short, encode_uplink};

    fn random_bytes(len: usize, rng: &mut StdRng) -> Vec<u8> {
        (0..len).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_long_downlink_clean() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(2);

        let mut data = random_bytes(DOWNLINK_LONG_DATA_BYTES, &mut rng);
        data[0] |= 0x08; // payload type != 0 marks a long frame
        let raw = encode_downlink_long(&data);

        let (corrected, errors) = fec.correct_downlink(&raw, &[]).expect("decode failure");
        assert_eq!(corrected, data);
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_long_downlink_with_errors() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(3);

        let mut data = random_bytes(DOWNLINK_LONG_DATA_BYTES, &mut rng);
        data[0] |= 0x08;
        let raw = encode_downlink_long(&data);

        let mut corrupted = raw.clone();
        corrupted[3] ^= 0x55;
        corrupted[40] ^= 0xaa;

        let (corrected, errors) = fec
            .correct_downlink(&corrupted, &[])
            .expect("decode failure");
        assert_eq!(corrected, data);
        assert_eq!(errors, 2);
    }

    #[test]
    fn test_long_downlink_uncorrectable() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(4);

        let mut data = random_bytes(DOWNLINK_LONG_DATA_BYTES, &mut rng);
        data[0] |= 0x08;
        let mut raw = encode_downlink_long(&data);

        // more errors than the long code can correct; the short retry
        // sees a buffer that is nowhere near a short codeword
        for i in 0..8 {
            raw[i * 5] ^= 0x3c;
        }
        assert!(fec.correct_downlink(&raw, &[]).is_none());
    }

    #[test]
    fn test_short_downlink_in_long_buffer() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(5);

        let mut data = random_bytes(DOWNLINK_SHORT_DATA_BYTES, &mut rng);
        data[0] &= 0x07; // payload type 0
        let short = encode_downlink_short(&data);

        // the demodulator always slices a long frame's worth; the
        // trailing bytes are whatever came off the air after the frame
        let mut raw = short.clone();
        raw.extend_from_slice(&random_bytes(
            DOWNLINK_LONG_BYTES - DOWNLINK_SHORT_BYTES,
            &mut rng,
        ));

        let (corrected, _) = fec.correct_downlink(&raw, &[]).expect("decode failure");
        assert_eq!(corrected, data);
    }

    #[test]
    fn test_short_header_beats_long_decode() {
        // a long codeword whose corrected header says "short" must be
        // rejected and re-tried as a short frame
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(6);

        let mut short_data = random_bytes(DOWNLINK_SHORT_DATA_BYTES, &mut rng);
        short_data[0] &= 0x07;
        let short = encode_downlink_short(&short_data);

        // build a valid long codeword that contains the short codeword
        // as its first 30 bytes
        let mut long_data = short.clone();
        long_data.extend_from_slice(&random_bytes(
            DOWNLINK_LONG_DATA_BYTES - DOWNLINK_SHORT_BYTES,
            &mut rng,
        ));
        let raw = encode_downlink_long(&long_data);

        let (corrected, errors) = fec.correct_downlink(&raw, &[]).expect("decode failure");
        assert_eq!(corrected.len(), DOWNLINK_SHORT_DATA_BYTES);
        assert_eq!(corrected, short_data);
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_downlink_erasures() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(7);

        let mut data = random_bytes(DOWNLINK_LONG_DATA_BYTES, &mut rng);
        data[0] |= 0x08;
        let raw = encode_downlink_long(&data);

        // a full complement of erasures is recoverable
        let mut corrupted = raw.clone();
        let erasures: Vec<usize> = (0..DOWNLINK_LONG_ROOTS).map(|i| i * 3 + 1).collect();
        for &e in &erasures {
            corrupted[e] ^= 0xff;
        }

        let (corrected, _) = fec
            .correct_downlink(&corrupted, &erasures)
            .expect("decode failure");
        assert_eq!(corrected, data);

        // one erasure over the limit is rejected outright
        let too_many: Vec<usize> = (0..DOWNLINK_LONG_ROOTS + 1).collect();
        assert!(fec.correct_downlink(&corrupted, &too_many).is_none());
    }

    #[test]
    fn test_uplink_round_trip() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(8);

        let data = random_bytes(UPLINK_DATA_BYTES, &mut rng);
        let raw = encode_uplink(&data);

        let (corrected, errors) = fec.correct_uplink(&raw, &[]).expect("decode failure");
        assert_eq!(corrected, data);
        assert_eq!(errors, 0);
    }

    #[test]
    fn test_uplink_errors_per_block() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(9);

        let data = random_bytes(UPLINK_DATA_BYTES, &mut rng);
        let mut raw = encode_uplink(&data);

        // three symbol errors in every block: raw index i belongs to
        // block i % 6
        for block in 0..UPLINK_BLOCKS_PER_FRAME {
            for k in 0..3 {
                raw[(10 + 7 * k) * UPLINK_BLOCKS_PER_FRAME + block] ^= 0x81;
            }
        }

        let (corrected, errors) = fec.correct_uplink(&raw, &[]).expect("decode failure");
        assert_eq!(corrected, data);
        assert_eq!(errors, 3 * UPLINK_BLOCKS_PER_FRAME);
    }

    #[test]
    fn test_uplink_single_block_failure() {
        let fec = Fec::new();
        let mut rng = StdRng::seed_from_u64(10);

        let data = random_bytes(UPLINK_DATA_BYTES, &mut rng);
        let mut raw = encode_uplink(&data);

        // fifteen errors in one block exceeds its correction capacity
        for i in 0..15 {
            raw[(4 * i) * UPLINK_BLOCKS_PER_FRAME + 2] ^= 0x42;
        }
        assert!(fec.correct_uplink(&raw, &[]).is_none());
    }

    #[test]
    fn test_uplink_block_sizes() {
        assert_eq!(UPLINK_BLOCK_BYTES * UPLINK_BLOCKS_PER_FRAME, UPLINK_BYTES);
        assert_eq!(
            UPLINK_BLOCK_DATA_BYTES * UPLINK_BLOCKS_PER_FRAME,
            UPLINK_DATA_BYTES
        );
    }
}
