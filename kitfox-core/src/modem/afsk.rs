//! AFSK demodulator: quadrature tone detectors with multiple slicers.
//!
//! Each tone (mark and space) is detected by mixing with a local
//! quadrature oscillator and low-pass filtering the products; the envelope
//! difference, normalized by per-tone peak tracking, drives the slicers.
//! Each slicer applies its own threshold bias and runs its own bit-clock
//! PLL, so one noisy channel yields several independent bit streams.

use std::f32::consts::TAU;

use crate::modem::pll::Dpll;
use crate::modem::BitOut;

/// Fast-attack, slow-decay envelope tracker used for AGC.
#[derive(Debug, Clone)]
struct PeakTracker {
    peak: f32,
    attack: f32,
    decay: f32,
}

impl PeakTracker {
    fn new(attack: f32, decay: f32) -> Self {
        Self {
            peak: 0.0,
            attack,
            decay,
        }
    }

    fn update(&mut self, mag: f32) -> f32 {
        let rate = if mag > self.peak {
            self.attack
        } else {
            self.decay
        };
        self.peak += (mag - self.peak) * rate;
        self.peak.max(1e-6)
    }
}

#[derive(Debug, Clone)]
struct ToneDetector {
    phase: f32,
    step: f32,
    i: f32,
    q: f32,
    alpha: f32,
}

impl ToneDetector {
    fn new(freq: f32, sample_rate: f32, alpha: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * freq / sample_rate,
            i: 0.0,
            q: 0.0,
            alpha,
        }
    }

    fn process(&mut self, sample: f32) -> f32 {
        self.phase += self.step;
        if self.phase > TAU {
            self.phase -= TAU;
        }
        let (sin, cos) = self.phase.sin_cos();
        self.i += (sample * cos - self.i) * self.alpha;
        self.q += (sample * sin - self.q) * self.alpha;
        (self.i * self.i + self.q * self.q).sqrt()
    }
}

#[derive(Debug, Clone)]
struct Slicer {
    threshold: f32,
    dpll: Dpll,
    prev_bit: bool,
}

/// One AFSK sub-channel demodulator.
#[derive(Debug, Clone)]
pub struct AfskDemod {
    mark: ToneDetector,
    space: ToneDetector,
    mark_peak: PeakTracker,
    space_peak: PeakTracker,
    slicers: Vec<Slicer>,
}

impl AfskDemod {
    pub fn new(sample_rate: f32, baud: f32, mark_freq: f32, space_freq: f32, slicers: usize) -> Self {
        // Detector bandwidth scales with the symbol rate.
        let fc = 0.45 * baud;
        let alpha = 1.0 - (-TAU * fc / sample_rate).exp();

        let slicers = (0..slicers.max(1))
            .map(|i| Slicer {
                threshold: slicer_offset(i),
                dpll: Dpll::new(sample_rate, baud),
                prev_bit: false,
            })
            .collect();

        Self {
            mark: ToneDetector::new(mark_freq, sample_rate, alpha),
            space: ToneDetector::new(space_freq, sample_rate, alpha),
            mark_peak: PeakTracker::new(0.25, 0.00013),
            space_peak: PeakTracker::new(0.25, 0.00013),
            slicers,
        }
    }

    pub fn slicer_count(&self) -> usize {
        self.slicers.len()
    }

    /// Process one audio sample; sampled bits are pushed into `out`.
    pub fn process_sample(&mut self, sample: f32, out: &mut BitOut) {
        let mark_mag = self.mark.process(sample);
        let space_mag = self.space.process(sample);

        // Envelope difference, normalized by the stronger tone's peak.
        let mark_peak = self.mark_peak.update(mark_mag);
        let space_peak = self.space_peak.update(space_mag);
        let demod = (mark_mag - space_mag) / mark_peak.max(space_peak);

        for (idx, slicer) in self.slicers.iter_mut().enumerate() {
            let bit = demod > slicer.threshold;
            let transition = bit != slicer.prev_bit;
            slicer.prev_bit = bit;
            if slicer.dpll.advance(transition) {
                out.push(idx as u8, bit);
            }
        }
    }
}

/// Threshold bias ladder: 0, then symmetric pairs in a geometric
/// progression about zero.
pub fn slicer_offset(index: usize) -> f32 {
    if index == 0 {
        return 0.0;
    }
    let magnitude = 0.1 * (1 << ((index - 1) / 2)) as f32;
    if index % 2 == 1 {
        magnitude
    } else {
        -magnitude
    }
}
