//! Scrambled-NRZI baseband demodulator (G3RUH / K9NG, typically 9600 bps).
//!
//! The signal is already baseband: a single-pole low-pass cleans it up,
//! multiple slicers threshold it, and each slicer's bit stream runs
//! through the self-synchronizing descrambler (x^17 + x^12 + 1) before
//! NRZI decoding in the deframer.

use std::f32::consts::TAU;

use crate::modem::afsk::slicer_offset;
use crate::modem::pll::Dpll;
use crate::modem::BitOut;

/// Transmit-side multiplicative scrambler, x^17 + x^12 + 1.
#[derive(Debug, Clone, Default)]
pub struct Scrambler {
    sr: u32,
}

impl Scrambler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scramble_bit(&mut self, bit: bool) -> bool {
        let out = bit as u32 ^ (self.sr >> 11) & 1 ^ (self.sr >> 16) & 1;
        self.sr = (self.sr << 1) | out;
        out != 0
    }
}

/// Receive-side descrambler; self-synchronizes within 17 bits.
#[derive(Debug, Clone, Default)]
pub struct Descrambler {
    sr: u32,
}

impl Descrambler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn descramble_bit(&mut self, bit: bool) -> bool {
        let out = bit as u32 ^ (self.sr >> 11) & 1 ^ (self.sr >> 16) & 1;
        self.sr = (self.sr << 1) | bit as u32;
        out != 0
    }
}

#[derive(Debug, Clone)]
struct Slicer {
    threshold: f32,
    dpll: Dpll,
    prev_bit: bool,
    descrambler: Descrambler,
}

#[derive(Debug, Clone)]
pub struct BasebandDemod {
    alpha: f32,
    lpf: f32,
    pos_peak: f32,
    neg_peak: f32,
    slicers: Vec<Slicer>,
}

impl BasebandDemod {
    pub fn new(sample_rate: f32, baud: f32, slicers: usize) -> Self {
        let fc = 0.45 * baud;
        let alpha = 1.0 - (-TAU * fc / sample_rate).exp();
        let slicers = (0..slicers.max(1))
            .map(|i| Slicer {
                threshold: slicer_offset(i),
                dpll: Dpll::new(sample_rate, baud),
                prev_bit: false,
                descrambler: Descrambler::new(),
            })
            .collect();
        Self {
            alpha,
            lpf: 0.0,
            pos_peak: 0.0,
            neg_peak: 0.0,
            slicers,
        }
    }

    pub fn slicer_count(&self) -> usize {
        self.slicers.len()
    }

    /// Process one audio sample; descrambled bits land in `out`.
    pub fn process_sample(&mut self, sample: f32, out: &mut BitOut) {
        self.lpf += (sample - self.lpf) * self.alpha;

        // Track both rails for a midpoint reference.
        let decay = 0.00013;
        if self.lpf > self.pos_peak {
            self.pos_peak += (self.lpf - self.pos_peak) * 0.25;
        } else {
            self.pos_peak += (self.lpf - self.pos_peak) * decay;
        }
        if self.lpf < self.neg_peak {
            self.neg_peak += (self.lpf - self.neg_peak) * 0.25;
        } else {
            self.neg_peak += (self.lpf - self.neg_peak) * decay;
        }
        let span = (self.pos_peak - self.neg_peak).max(1e-6);
        let midpoint = (self.pos_peak + self.neg_peak) * 0.5;
        let demod = (self.lpf - midpoint) / (span * 0.5);

        for (idx, slicer) in self.slicers.iter_mut().enumerate() {
            let raw = demod > slicer.threshold;
            let transition = raw != slicer.prev_bit;
            slicer.prev_bit = raw;
            if slicer.dpll.advance(transition) {
                let bit = slicer.descrambler.descramble_bit(raw);
                out.push(idx as u8, bit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrambler_descrambler_are_inverse() {
        let mut tx = Scrambler::new();
        let mut rx = Descrambler::new();
        let data: Vec<bool> = (0..300).map(|i| (i * 7) % 3 == 0).collect();
        let scrambled: Vec<bool> = data.iter().map(|&b| tx.scramble_bit(b)).collect();
        let descrambled: Vec<bool> = scrambled.iter().map(|&b| rx.descramble_bit(b)).collect();
        // Identical seeds, so the streams agree from the first bit.
        assert_eq!(descrambled, data);
    }

    #[test]
    fn descrambler_self_synchronizes() {
        let mut tx = Scrambler { sr: 0x15A5A };
        let mut rx = Descrambler::new();
        let data: Vec<bool> = (0..200).map(|i| i % 5 == 0).collect();
        let scrambled: Vec<bool> = data.iter().map(|&b| tx.scramble_bit(b)).collect();
        let descrambled: Vec<bool> = scrambled.iter().map(|&b| rx.descramble_bit(b)).collect();
        // After 17 bits of state flush the streams agree.
        assert_eq!(&descrambled[17..], &data[17..]);
    }

    #[test]
    fn scrambled_output_is_balanced() {
        // A constant input should still produce a mixed output stream.
        let mut tx = Scrambler::new();
        let bits: Vec<bool> = (0..500).map(|_| tx.scramble_bit(true)).collect();
        let ones = bits.iter().filter(|&&b| b).count();
        assert!(ones > 150 && ones < 350, "{} ones", ones);
    }
}
