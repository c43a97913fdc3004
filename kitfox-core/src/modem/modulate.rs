//! Direct-digital-synthesis modulator.
//!
//! A 256-entry sine table driven by a 32-bit phase accumulator produces
//! the carrier; a fractional samples-per-bit accumulator supports
//! arbitrary bit rates without drift. AFSK selects one of two phase
//! increments per bit, PSK adds per-symbol phase shifts with a short
//! smoothing ramp, and the scrambled baseband mode emits bipolar levels
//! through the transmit scrambler.

use std::f64::consts::TAU;

use crate::config::{ChannelConfig, ModemKind, V26Alternative};
use crate::modem::baseband::Scrambler;
use crate::modem::psk::{v26_delta_deg, v27_delta_deg};

/// Peak amplitude of generated audio, leaving headroom below i16 range.
const AMPLITUDE: f64 = 12000.0;

/// Length of the phase-smoothing ramp at a PSK symbol boundary, as a
/// fraction of the symbol interval.
const PSK_RAMP_FRACTION: f64 = 0.25;

fn build_sine_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = ((TAU * i as f64 / 256.0).sin() * AMPLITUDE) as i16;
    }
    table
}

fn phase_step(freq: f64, sample_rate: f64) -> u32 {
    ((freq / sample_rate) * 4_294_967_296.0) as u64 as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineCoding {
    AfskNrzi,
    Psk { bits_per_symbol: u32 },
    ScrambledNrzi,
}

/// Per-channel transmit modulator.
pub struct Modulator {
    coding: LineCoding,
    /// Samples per bit (or per symbol for PSK), fractional.
    samples_per_unit: f64,
    /// Fractional sample carry between units.
    unit_acc: f64,
    sine: [i16; 256],
    phase: u32,
    mark_step: u32,
    space_step: u32,
    carrier_step: u32,
    /// NRZI line state.
    level: bool,
    scrambler: Scrambler,
    /// PSK data phase, degrees.
    psk_phase_deg: f64,
    v26: V26Alternative,
    /// Pending bits toward the next PSK symbol.
    symbol_bits: u32,
    symbol_acc: u8,
}

impl Modulator {
    pub fn new(cfg: &ChannelConfig, sample_rate: u32) -> Self {
        let fs = sample_rate as f64;
        let coding = match cfg.modem {
            ModemKind::Afsk => LineCoding::AfskNrzi,
            ModemKind::Qpsk => LineCoding::Psk { bits_per_symbol: 2 },
            ModemKind::EightPsk => LineCoding::Psk { bits_per_symbol: 3 },
            ModemKind::Baseband => LineCoding::ScrambledNrzi,
        };
        let units_per_sec = match coding {
            LineCoding::Psk { bits_per_symbol } => cfg.baud as f64 / bits_per_symbol as f64,
            _ => cfg.baud as f64,
        };
        Self {
            coding,
            samples_per_unit: fs / units_per_sec,
            unit_acc: 0.0,
            sine: build_sine_table(),
            phase: 0,
            mark_step: phase_step(cfg.mark_freq as f64, fs),
            space_step: phase_step(cfg.space_freq as f64, fs),
            carrier_step: phase_step(cfg.carrier_freq as f64, fs),
            level: true,
            scrambler: Scrambler::new(),
            psk_phase_deg: 0.0,
            v26: cfg.v26,
            symbol_bits: 0,
            symbol_acc: 0,
        }
    }

    /// Number of whole samples for the next bit/symbol interval,
    /// carrying the fractional remainder forward.
    fn unit_samples(&mut self) -> usize {
        self.unit_acc += self.samples_per_unit;
        let n = self.unit_acc.floor() as usize;
        self.unit_acc -= n as f64;
        n
    }

    fn dds_sample(&mut self, step: u32) -> i16 {
        self.phase = self.phase.wrapping_add(step);
        self.sine[(self.phase >> 24) as usize]
    }

    /// Modulate a stream of line bits into samples appended to `out`.
    ///
    /// For AFSK the bits are NRZI-encoded onto the two tones; for the
    /// baseband mode they are NRZI-encoded then scrambled; for PSK they
    /// are grouped into symbols and applied as phase shifts.
    pub fn modulate_bits(&mut self, bits: &[u8], out: &mut Vec<i16>) {
        match self.coding {
            LineCoding::AfskNrzi => {
                for &bit in bits {
                    if bit == 0 {
                        self.level = !self.level;
                    }
                    let step = if self.level {
                        self.mark_step
                    } else {
                        self.space_step
                    };
                    for _ in 0..self.unit_samples() {
                        let s = self.dds_sample(step);
                        out.push(s);
                    }
                }
            }
            LineCoding::ScrambledNrzi => {
                for &bit in bits {
                    if bit == 0 {
                        self.level = !self.level;
                    }
                    let line = self.scrambler.scramble_bit(self.level);
                    let value = if line {
                        AMPLITUDE as i16
                    } else {
                        -(AMPLITUDE as i16)
                    };
                    for _ in 0..self.unit_samples() {
                        out.push(value);
                    }
                }
            }
            LineCoding::Psk { bits_per_symbol } => {
                for &bit in bits {
                    self.symbol_acc = (self.symbol_acc << 1) | (bit & 1);
                    self.symbol_bits += 1;
                    if self.symbol_bits == bits_per_symbol {
                        let symbol = self.symbol_acc;
                        self.symbol_bits = 0;
                        self.symbol_acc = 0;
                        self.emit_psk_symbol(symbol, bits_per_symbol, out);
                    }
                }
            }
        }
    }

    fn emit_psk_symbol(&mut self, symbol: u8, bits_per_symbol: u32, out: &mut Vec<i16>) {
        let delta = match bits_per_symbol {
            2 => v26_delta_deg(symbol, self.v26),
            _ => v27_delta_deg(symbol),
        };
        let start_deg = self.psk_phase_deg;
        let target_deg = start_deg + delta;
        self.psk_phase_deg = target_deg.rem_euclid(360.0);

        let n = self.unit_samples();
        let ramp = ((n as f64 * PSK_RAMP_FRACTION) as usize).max(1);
        for i in 0..n {
            // Smooth the phase step over the first part of the symbol,
            // in place of a full pulse-shaping filter.
            let data_deg = if i < ramp {
                start_deg + delta * (i + 1) as f64 / ramp as f64
            } else {
                target_deg
            };
            self.phase = self.phase.wrapping_add(self.carrier_step);
            let data_offset = ((data_deg / 360.0) * 4_294_967_296.0) as i64 as u32;
            let idx = (self.phase.wrapping_add(data_offset) >> 24) as usize;
            out.push(self.sine[idx]);
        }
    }

    /// Flush any partial PSK symbol by padding with zero bits.
    pub fn flush(&mut self, out: &mut Vec<i16>) {
        if matches!(self.coding, LineCoding::Psk { .. }) {
            while self.symbol_bits != 0 {
                self.modulate_bits(&[0], out);
            }
        }
    }

    /// Emit unmodulated silence, used around bursts in tests.
    pub fn silence(&mut self, samples: usize, out: &mut Vec<i16>) {
        out.extend(std::iter::repeat(0).take(samples));
    }
}
