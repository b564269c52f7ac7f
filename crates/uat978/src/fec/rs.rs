//! Shortened Reed-Solomon codec over GF(2⁸)
//!
//! All three UAT codes are RS(255, 255-nroots) shortened by a pad of
//! leading zero symbols that never travel on the air. The decoder is
//! the classic errors-and-erasures chain: syndromes, Berlekamp-Massey
//! for the error locator polynomial, Chien search for its roots, and
//! Forney's algorithm for the error magnitudes.
//!
//! Two hardening rules apply on top of the textbook algorithm: a
//! computed error location inside the shortening pad is treated as an
//! uncorrectable block, and the syndromes are recomputed after the
//! corrections are applied. If either check fails the block is
//! restored to its input state, so a failed decode never modifies its
//! input.

/// Symbols per full-length codeword
const NN: usize = 255;

/// Sentinel for log(0) in the index tables
const A0: u8 = NN as u8;

#[inline]
fn modnn(x: usize) -> usize {
    x % NN
}

/// One Reed-Solomon code instance
///
/// Parameterized by the GF(256) field generator polynomial, the first
/// consecutive root of the code generator, the primitive element, the
/// parity symbol count and the shortening pad.
pub struct ReedSolomon {
    fcr: usize,
    prim: usize,
    iprim: usize,
    nroots: usize,
    pad: usize,
    alpha_to: [u8; 256],
    index_of: [u8; 256],
    genpoly: Vec<u8>,
}

impl ReedSolomon {
    pub fn new(gfpoly: u32, fcr: usize, prim: usize, nroots: usize, pad: usize) -> Self {
        assert!(nroots < NN);
        assert!(pad < NN - nroots);

        let mut alpha_to = [0u8; 256];
        let mut index_of = [0u8; 256];

        index_of[0] = A0;
        alpha_to[A0 as usize] = 0;
        let mut sr: u32 = 1;
        for i in 0..NN {
            index_of[sr as usize] = i as u8;
            alpha_to[i] = sr as u8;
            sr <<= 1;
            if sr & 0x100 != 0 {
                sr ^= gfpoly;
            }
            sr &= NN as u32;
        }
        // a non-primitive field generator would have cycled early
        assert_eq!(sr, 1, "field generator polynomial is not primitive");

        let mut iprim = 1;
        while iprim % prim != 0 {
            iprim += NN;
        }
        let iprim = iprim / prim;

        // build the code generator polynomial from its roots
        let mut genpoly = vec![0u8; nroots + 1];
        genpoly[0] = 1;
        let mut root = fcr * prim;
        for i in 0..nroots {
            genpoly[i + 1] = 1;

            // multiply genpoly by (x + alpha^root)
            for j in (1..=i).rev() {
                if genpoly[j] != 0 {
                    genpoly[j] = genpoly[j - 1]
                        ^ alpha_to[modnn(index_of[genpoly[j] as usize] as usize + root)];
                } else {
                    genpoly[j] = genpoly[j - 1];
                }
            }
            // genpoly[0] can never be zero
            genpoly[0] = alpha_to[modnn(index_of[genpoly[0] as usize] as usize + root)];
            root += prim;
        }

        // store in index form for quicker encoding
        for g in genpoly.iter_mut() {
            *g = index_of[*g as usize];
        }

        Self {
            fcr,
            prim,
            iprim,
            nroots,
            pad,
            alpha_to,
            index_of,
            genpoly,
        }
    }

    /// Number of parity symbols
    pub fn nroots(&self) -> usize {
        self.nroots
    }

    /// Shortened block length, data plus parity
    pub fn block_len(&self) -> usize {
        NN - self.pad
    }

    /// Data symbols per block
    pub fn data_len(&self) -> usize {
        self.block_len() - self.nroots
    }

    /// Fill in the trailing parity symbols of `block`
    ///
    /// `block` is a whole shortened block; the leading
    /// [`data_len()`](Self::data_len) symbols are read and the trailing
    /// parity symbols are overwritten.
    pub fn encode(&self, block: &mut [u8]) {
        assert_eq!(block.len(), self.block_len());

        let al = &self.alpha_to;
        let il = &self.index_of;
        let nroots = self.nroots;

        let mut parity = vec![0u8; nroots];
        for i in 0..self.data_len() {
            let feedback = il[(block[i] ^ parity[0]) as usize];
            if feedback != A0 {
                for j in 1..nroots {
                    parity[j] ^=
                        al[modnn(feedback as usize + self.genpoly[nroots - j] as usize)];
                }
            }
            parity.copy_within(1.., 0);
            parity[nroots - 1] = if feedback != A0 {
                al[modnn(feedback as usize + self.genpoly[0] as usize)]
            } else {
                0
            };
        }

        block[self.data_len()..].copy_from_slice(&parity);
    }

    /// Correct a shortened block in place
    ///
    /// `erasures` holds known-unreliable symbol positions as indices
    /// into the *logical* 255-symbol block, i.e. already biased by the
    /// shortening pad. Returns the number of corrected symbols, or
    /// `None` if the block is uncorrectable; an uncorrectable block is
    /// left exactly as it was passed in.
    pub fn decode(&self, block: &mut [u8], erasures: &[usize]) -> Option<usize> {
        assert_eq!(block.len(), self.block_len());

        let nroots = self.nroots;
        if erasures.len() > nroots {
            return None;
        }
        debug_assert!(erasures.iter().all(|&e| (self.pad..NN).contains(&e)));

        let al = &self.alpha_to;
        let il = &self.index_of;

        // form the syndromes: evaluate the received poly at the roots
        // of the code generator
        let mut s = vec![block[0]; nroots];
        for &sym in &block[1..] {
            for (i, syn) in s.iter_mut().enumerate() {
                *syn = if *syn == 0 {
                    sym
                } else {
                    sym ^ al[modnn(il[*syn as usize] as usize + (self.fcr + i) * self.prim)]
                };
            }
        }

        let mut syn_error: u8 = 0;
        for syn in s.iter_mut() {
            syn_error |= *syn;
            *syn = il[*syn as usize];
        }
        if syn_error == 0 {
            // already a codeword
            return Some(0);
        }

        // initialize lambda with the erasure locator polynomial
        let mut lambda = vec![0u8; nroots + 1];
        lambda[0] = 1;
        let no_eras = erasures.len();
        if no_eras > 0 {
            lambda[1] = al[modnn(self.prim * (NN - 1 - erasures[0]))];
            for i in 1..no_eras {
                let u = modnn(self.prim * (NN - 1 - erasures[i]));
                for j in (1..=i + 1).rev() {
                    let tmp = il[lambda[j - 1] as usize];
                    if tmp != A0 {
                        lambda[j] ^= al[modnn(u + tmp as usize)];
                    }
                }
            }
        }

        let mut b: Vec<u8> = lambda.iter().map(|&l| il[l as usize]).collect();
        let mut t = vec![0u8; nroots + 1];

        // Berlekamp-Massey: grow lambda into the combined error and
        // erasure locator polynomial
        let mut r = no_eras;
        let mut el = no_eras;
        while r < nroots {
            r += 1;

            let mut discr: u8 = 0;
            for i in 0..r {
                if lambda[i] != 0 && s[r - i - 1] != A0 {
                    discr ^= al[modnn(il[lambda[i] as usize] as usize + s[r - i - 1] as usize)];
                }
            }
            let discr = il[discr as usize];

            if discr == A0 {
                // b(x) <-- x*b(x)
                b.copy_within(0..nroots, 1);
                b[0] = A0;
            } else {
                // t(x) <-- lambda(x) - discr*x*b(x)
                t[0] = lambda[0];
                for i in 0..nroots {
                    t[i + 1] = if b[i] != A0 {
                        lambda[i + 1] ^ al[modnn(discr as usize + b[i] as usize)]
                    } else {
                        lambda[i + 1]
                    };
                }
                if 2 * el <= r + no_eras - 1 {
                    el = r + no_eras - el;
                    // b(x) <-- inv(discr) * lambda(x)
                    for (bi, &li) in b.iter_mut().zip(lambda.iter()) {
                        *bi = if li == 0 {
                            A0
                        } else {
                            modnn(il[li as usize] as usize + NN - discr as usize) as u8
                        };
                    }
                } else {
                    b.copy_within(0..nroots, 1);
                    b[0] = A0;
                }
                lambda.copy_from_slice(&t);
            }
        }

        // convert lambda to index form and compute its degree
        let mut deg_lambda = 0;
        for (i, l) in lambda.iter_mut().enumerate() {
            *l = il[*l as usize];
            if *l != A0 {
                deg_lambda = i;
            }
        }

        // Chien search for the roots of lambda
        let mut reg = lambda.clone();
        let mut root = vec![0usize; nroots];
        let mut loc = vec![0usize; nroots];
        let mut count = 0usize;
        let mut k = self.iprim - 1;
        for i in 1..=NN {
            let mut q: u8 = 1; // lambda[0] is always 1
            for j in (1..=deg_lambda).rev() {
                if reg[j] != A0 {
                    reg[j] = modnn(reg[j] as usize + j) as u8;
                    q ^= al[reg[j] as usize];
                }
            }
            if q == 0 {
                root[count] = i;
                loc[count] = k;
                count += 1;
                if count == deg_lambda {
                    break;
                }
            }
            k = modnn(k + self.iprim);
        }

        if deg_lambda != count {
            // deg(lambda) != number of roots: uncorrectable
            return None;
        }

        // omega(x) = s(x)*lambda(x) mod x^nroots, index form
        let deg_omega = deg_lambda.saturating_sub(1);
        let mut omega = vec![A0; nroots + 1];
        for i in 0..=deg_omega {
            let mut tmp: u8 = 0;
            for j in (0..=i).rev() {
                if s[i - j] != A0 && lambda[j] != A0 {
                    tmp ^= al[modnn(s[i - j] as usize + lambda[j] as usize)];
                }
            }
            omega[i] = il[tmp as usize];
        }

        // Forney: compute error magnitudes and collect the corrections
        // without touching the block yet
        let mut corrections: Vec<(usize, u8)> = Vec::with_capacity(count);
        for j in (0..count).rev() {
            let mut num1: u8 = 0;
            for i in (0..=deg_omega).rev() {
                if omega[i] != A0 {
                    num1 ^= al[modnn(omega[i] as usize + i * root[j])];
                }
            }
            let num2 = al[modnn(root[j] * (self.fcr - 1) + NN)];

            // lambda[i+1] for even i is the formal derivative of lambda
            let mut den: u8 = 0;
            let mut i = deg_lambda.min(nroots - 1) & !1;
            loop {
                if lambda[i + 1] != A0 {
                    den ^= al[modnn(lambda[i + 1] as usize + i * root[j])];
                }
                if i < 2 {
                    break;
                }
                i -= 2;
            }
            if den == 0 {
                return None;
            }

            if num1 != 0 {
                if loc[j] < self.pad {
                    // error located in the shortening pad: the block
                    // cannot be a corrupted codeword of this code
                    return None;
                }
                let magnitude = al[modnn(
                    il[num1 as usize] as usize + il[num2 as usize] as usize + NN
                        - il[den as usize] as usize,
                )];
                corrections.push((loc[j] - self.pad, magnitude));
            }
        }

        for &(pos, magnitude) in &corrections {
            block[pos] ^= magnitude;
        }

        // recheck: the corrected block must be a codeword
        if !self.is_codeword(block) {
            for &(pos, magnitude) in &corrections {
                block[pos] ^= magnitude;
            }
            return None;
        }

        Some(count)
    }

    fn is_codeword(&self, block: &[u8]) -> bool {
        let al = &self.alpha_to;
        let il = &self.index_of;

        for i in 0..self.nroots {
            let mut syn = block[0];
            for &sym in &block[1..] {
                syn = if syn == 0 {
                    sym
                } else {
                    sym ^ al[modnn(il[syn as usize] as usize + (self.fcr + i) * self.prim)]
                };
            }
            if syn != 0 {
                return false;
            }
        }
        true
    }
}
