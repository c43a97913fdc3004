//! The demodulator bank: one per radio channel.
//!
//! A channel runs up to nine sub-channel demodulators at offset center
//! frequencies, each with up to three threshold slicers, bounded by
//! subchannels x slicers <= 24. Every slicer's bit stream feeds an HDLC
//! deframer plus the FX.25 and IL2P correlators in parallel. The first
//! framing to complete a frame with a good FCS wins; copies of the same
//! frame from other slicers inside the de-duplication window are recorded
//! in the decode spectrum and discarded.

pub mod afsk;
pub mod baseband;
pub mod modulate;
pub mod pll;
pub mod psk;

use std::collections::VecDeque;

use crate::config::{ChannelConfig, ModemKind, MAX_SUBCHANS_X_SLICERS};
use crate::errors::ModemError;
use crate::fec::fx25::Fx25Receiver;
use crate::fec::il2p::Il2pReceiver;
use crate::hdlc::deframe::{DecodedFrame, HdlcDeframer};

use afsk::AfskDemod;
use baseband::BasebandDemod;
use psk::{PskDemod, PskMode};

/// Sampled bits produced by one demodulator call: (slicer index, bit).
#[derive(Debug, Default)]
pub struct BitOut {
    events: Vec<(u8, bool)>,
}

impl BitOut {
    pub fn push(&mut self, slicer: u8, bit: bool) {
        self.events.push((slicer, bit));
    }

    pub fn events(&self) -> &[(u8, bool)] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// A frame delivered by the bank, ready for the DLQ.
#[derive(Debug, Clone)]
pub struct RxEvent {
    pub chan: usize,
    pub subchan: i8,
    pub slicer: i8,
    /// Frame body, FCS stripped.
    pub body: Vec<u8>,
    pub crc: u16,
    /// Bit flips or FEC symbol corrections spent recovering the frame.
    pub retries: u8,
    /// Peak audio level around reception, percent of full scale.
    pub alevel: u8,
    /// One character per subchannel x slicer: '|' first to decode, '.'
    /// also decoded, '_' nothing.
    pub spectrum: String,
}

/// Aggregated decode counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemodStats {
    pub frames_ok: u64,
    pub frames_fixed: u64,
    pub fcs_errors: u64,
    pub fx25_recovered: u64,
    pub il2p_recovered: u64,
}

enum SubDemod {
    Afsk(AfskDemod),
    Psk(PskDemod),
    Baseband(BasebandDemod),
}

impl SubDemod {
    fn process_sample(&mut self, sample: f32, out: &mut BitOut) {
        match self {
            SubDemod::Afsk(d) => d.process_sample(sample, out),
            SubDemod::Psk(d) => d.process_sample(sample, out),
            SubDemod::Baseband(d) => d.process_sample(sample, out),
        }
    }

    fn slicer_count(&self) -> usize {
        match self {
            SubDemod::Afsk(d) => d.slicer_count(),
            SubDemod::Psk(d) => d.slicer_count(),
            SubDemod::Baseband(d) => d.slicer_count(),
        }
    }
}

/// Per-slicer receive chain: NRZI decoding happens here, once, so all
/// three framings see the same data-bit stream.
struct SlicerSink {
    nrzi: bool,
    prev_raw: bool,
    deframer: HdlcDeframer,
    fx25: Fx25Receiver,
    il2p: Il2pReceiver,
    prev_flags: u64,
}

impl SlicerSink {
    fn feed(
        &mut self,
        raw: bool,
        subchan: usize,
        slicer: usize,
        frames: &mut Vec<(usize, usize, DecodedFrame)>,
    ) -> bool {
        let bit = if self.nrzi {
            let b = !(raw ^ self.prev_raw);
            self.prev_raw = raw;
            b
        } else {
            raw
        };
        if let Some(f) = self.deframer.rec_bit(bit) {
            frames.push((subchan, slicer, f));
        }
        if let Some(f) = self.fx25.rec_bit(bit) {
            frames.push((subchan, slicer, f));
        }
        if let Some(f) = self.il2p.rec_bit(bit) {
            frames.push((subchan, slicer, f));
        }
        let active = self.deframer.in_frame() || self.deframer.flags_seen != self.prev_flags;
        self.prev_flags = self.deframer.flags_seen;
        active
    }
}

struct SubChannel {
    demod: SubDemod,
    sinks: Vec<SlicerSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlicerMark {
    Silent,
    Winner,
    AlsoPassed,
}

struct PendingWinner {
    event: RxEvent,
    decided_at: u64,
    marks: Vec<SlicerMark>,
}

/// Data-carrier detect with a release window.
struct DcdTracker {
    last_activity: u64,
    release_samples: u64,
}

impl DcdTracker {
    fn busy(&self, tick: u64) -> bool {
        tick.wrapping_sub(self.last_activity) < self.release_samples
    }
}

pub struct DemodBank {
    chan: usize,
    subchans: Vec<SubChannel>,
    bit_out: BitOut,
    frames_scratch: Vec<(usize, usize, DecodedFrame)>,
    decimate: u32,
    tick: u64,
    /// Hold a winner this many samples to collect agreement marks.
    settle_samples: u64,
    /// Suppress duplicates of a dispatched frame for this long.
    dedupe_samples: u64,
    pending: Option<PendingWinner>,
    recent: VecDeque<(u16, u64)>,
    dcd: DcdTracker,
    peak: f32,
    events: VecDeque<RxEvent>,
}

impl DemodBank {
    pub fn new(chan: usize, cfg: &ChannelConfig, sample_rate: u32) -> Result<Self, ModemError> {
        let subchan_count = cfg.subchannels.max(1) as usize;
        let slicer_count = cfg.slicers.max(1) as usize;
        if subchan_count * slicer_count > MAX_SUBCHANS_X_SLICERS {
            return Err(ModemError::TooManySlicers {
                requested: subchan_count * slicer_count,
                max: MAX_SUBCHANS_X_SLICERS,
            });
        }
        let fs = sample_rate as f32 / cfg.decimate.max(1) as f32;
        if cfg.baud > fs / 3.0 {
            return Err(ModemError::UnsupportedRate {
                baud: cfg.baud,
                sample_rate,
            });
        }

        let mut subchans = Vec::with_capacity(subchan_count);
        for k in 0..subchan_count {
            let offset = (k as f32 - (subchan_count as f32 - 1.0) / 2.0) * cfg.subchannel_spacing_hz;
            let demod = match cfg.modem {
                ModemKind::Afsk => SubDemod::Afsk(AfskDemod::new(
                    fs,
                    cfg.baud,
                    cfg.mark_freq + offset,
                    cfg.space_freq + offset,
                    slicer_count,
                )),
                ModemKind::Qpsk => SubDemod::Psk(PskDemod::new(
                    fs,
                    cfg.baud,
                    cfg.carrier_freq + offset,
                    PskMode::Qpsk(cfg.v26),
                )),
                ModemKind::EightPsk => SubDemod::Psk(PskDemod::new(
                    fs,
                    cfg.baud,
                    cfg.carrier_freq + offset,
                    PskMode::EightPsk,
                )),
                ModemKind::Baseband => {
                    SubDemod::Baseband(BasebandDemod::new(fs, cfg.baud, slicer_count))
                }
            };
            let nrzi = matches!(cfg.modem, ModemKind::Afsk | ModemKind::Baseband);
            let sinks = (0..demod.slicer_count())
                .map(|_| SlicerSink {
                    nrzi,
                    prev_raw: false,
                    deframer: HdlcDeframer::new(false, cfg.fix_bits, cfg.sanity),
                    fx25: Fx25Receiver::new(),
                    il2p: Il2pReceiver::new(),
                    prev_flags: 0,
                })
                .collect();
            subchans.push(SubChannel { demod, sinks });
        }

        let samples_per_bit = (sample_rate as f64 / cfg.baud as f64).max(1.0);
        Ok(Self {
            chan,
            subchans,
            bit_out: BitOut::default(),
            frames_scratch: Vec::new(),
            decimate: cfg.decimate.max(1) as u32,
            tick: 0,
            settle_samples: (samples_per_bit * 16.0) as u64,
            // Must outlast the trailing padding and parity of a full
            // FX.25 codeword, not just the HDLC copy of the same frame.
            dedupe_samples: (samples_per_bit * 8.0 * 325.0) as u64,
            pending: None,
            recent: VecDeque::with_capacity(4),
            dcd: DcdTracker {
                last_activity: u64::MAX / 2,
                release_samples: sample_rate as u64 / 10,
            },
            peak: 0.0,
            events: VecDeque::new(),
        })
    }

    /// Total slicer positions, for the spectrum string layout.
    fn slicer_positions(&self) -> usize {
        self.subchans.iter().map(|s| s.sinks.len()).sum()
    }

    pub fn dcd(&self) -> bool {
        self.dcd.busy(self.tick)
    }

    /// Peak audio level as a percentage of full scale.
    pub fn alevel(&self) -> u8 {
        ((self.peak / 32768.0) * 100.0).min(100.0) as u8
    }

    pub fn stats(&self) -> DemodStats {
        let mut stats = DemodStats::default();
        for sub in &self.subchans {
            for sink in &sub.sinks {
                stats.frames_ok += sink.deframer.frames_ok;
                stats.frames_fixed += sink.deframer.frames_fixed;
                stats.fcs_errors += sink.deframer.fcs_errors;
                stats.fx25_recovered += sink.fx25.frames_recovered;
                stats.il2p_recovered += sink.il2p.frames_recovered;
            }
        }
        stats
    }

    /// Hot path: called once per incoming audio sample.
    pub fn process_sample(&mut self, sample: i16) {
        self.tick += 1;

        let s = sample as f32;
        let mag = s.abs();
        if mag > self.peak {
            self.peak += (mag - self.peak) * 0.25;
        } else {
            self.peak += (mag - self.peak) * 0.0001;
        }

        if self.tick % self.decimate as u64 == 0 {
            for sub_idx in 0..self.subchans.len() {
                self.bit_out.clear();
                let sub = &mut self.subchans[sub_idx];
                sub.demod.process_sample(s, &mut self.bit_out);
                let mut active = false;
                for &(slicer, bit) in self.bit_out.events() {
                    let sink = &mut sub.sinks[slicer as usize];
                    active |= sink.feed(bit, sub_idx, slicer as usize, &mut self.frames_scratch);
                }
                if active {
                    self.dcd.last_activity = self.tick;
                }
            }
            if !self.frames_scratch.is_empty() {
                let frames = std::mem::take(&mut self.frames_scratch);
                for (subchan, slicer, frame) in frames {
                    self.accept_frame(subchan, slicer, frame);
                }
            }
        }

        self.flush_pending();
    }

    /// Index of a (subchannel, slicer) pair in the spectrum string.
    fn position_of(&self, subchan: usize, slicer: usize) -> usize {
        self.subchans[..subchan]
            .iter()
            .map(|s| s.sinks.len())
            .sum::<usize>()
            + slicer
    }

    fn accept_frame(&mut self, subchan: usize, slicer: usize, frame: DecodedFrame) {
        let position = self.position_of(subchan, slicer);

        // Duplicate of an already-dispatched frame?
        if self
            .recent
            .iter()
            .any(|&(crc, until)| crc == frame.crc && self.tick < until)
        {
            return;
        }

        if let Some(pending) = &mut self.pending {
            if pending.event.crc == frame.crc {
                pending.marks[position] = SlicerMark::AlsoPassed;
                return;
            }
        }
        if let Some(done) = self.pending.take() {
            // A different frame while one is pending: dispatch the old
            // one immediately so ordering is preserved.
            self.dispatch(done);
        }

        let mut marks = vec![SlicerMark::Silent; self.slicer_positions()];
        marks[position] = SlicerMark::Winner;
        let event = RxEvent {
            chan: self.chan,
            subchan: subchan as i8,
            slicer: slicer as i8,
            body: frame.body,
            crc: frame.crc,
            retries: frame.retries,
            alevel: self.alevel(),
            spectrum: String::new(),
        };
        self.pending = Some(PendingWinner {
            event,
            decided_at: self.tick,
            marks,
        });
    }

    fn flush_pending(&mut self) {
        let expired = match &self.pending {
            Some(p) => self.tick.wrapping_sub(p.decided_at) >= self.settle_samples,
            None => false,
        };
        if expired {
            let done = self.pending.take().unwrap();
            self.dispatch(done);
        }
    }

    fn dispatch(&mut self, pending: PendingWinner) {
        let mut event = pending.event;
        event.spectrum = pending
            .marks
            .iter()
            .map(|m| match m {
                SlicerMark::Silent => '_',
                SlicerMark::Winner => '|',
                SlicerMark::AlsoPassed => '.',
            })
            .collect();
        if self.recent.len() >= 4 {
            self.recent.pop_front();
        }
        self.recent
            .push_back((event.crc, self.tick + self.dedupe_samples));
        self.events.push_back(event);
    }

    /// Drain the next completed receive event, if any.
    pub fn poll_event(&mut self) -> Option<RxEvent> {
        self.events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CallSign, Frame, PID_NO_LAYER3};
    use crate::hdlc::stuff::HdlcEncoder;
    use crate::modem::modulate::Modulator;

    fn default_chan() -> ChannelConfig {
        ChannelConfig::default()
    }

    fn modulate_frame(frame: &Frame, cfg: &ChannelConfig, fs: u32) -> Vec<i16> {
        let mut enc = HdlcEncoder::new();
        enc.push_flags(32);
        enc.push_body(frame.as_bytes());
        enc.push_flags(16);
        let mut modulator = Modulator::new(cfg, fs);
        let mut audio = Vec::new();
        modulator.silence(2000, &mut audio);
        modulator.modulate_bits(&enc.bits(), &mut audio);
        modulator.silence(2000, &mut audio);
        audio
    }

    #[test]
    fn afsk_frame_decoded_through_bank() {
        let cfg = default_chan();
        let fs = 44_100;
        let dest: CallSign = "APRS".parse().unwrap();
        let src: CallSign = "N0CALL".parse().unwrap();
        let frame = Frame::new_ui(dest, src, &[], PID_NO_LAYER3, b"bank test").unwrap();
        let audio = modulate_frame(&frame, &cfg, fs);

        let mut bank = DemodBank::new(0, &cfg, fs).unwrap();
        let mut events = Vec::new();
        for s in audio {
            bank.process_sample(s);
            while let Some(ev) = bank.poll_event() {
                events.push(ev);
            }
        }
        // Flush the settle window.
        for _ in 0..bank.settle_samples + 10 {
            bank.process_sample(0);
            while let Some(ev) = bank.poll_event() {
                events.push(ev);
            }
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body, frame.as_bytes());
        assert_eq!(events[0].chan, 0);
        assert_eq!(events[0].spectrum.len(), 1);
        assert!(events[0].spectrum.contains('|'));
    }

    #[test]
    fn multiple_slicers_deduplicate() {
        let cfg = ChannelConfig {
            slicers: 3,
            ..default_chan()
        };
        let fs = 44_100;
        let dest: CallSign = "APRS".parse().unwrap();
        let src: CallSign = "N0CALL".parse().unwrap();
        let frame = Frame::new_ui(dest, src, &[], PID_NO_LAYER3, b"dedupe").unwrap();
        let audio = modulate_frame(&frame, &cfg, fs);

        let mut bank = DemodBank::new(0, &cfg, fs).unwrap();
        let mut events = Vec::new();
        for s in audio {
            bank.process_sample(s);
            while let Some(ev) = bank.poll_event() {
                events.push(ev);
            }
        }
        for _ in 0..bank.settle_samples + 10 {
            bank.process_sample(0);
            while let Some(ev) = bank.poll_event() {
                events.push(ev);
            }
        }

        assert_eq!(events.len(), 1, "duplicates must be suppressed");
        assert_eq!(events[0].spectrum.len(), 3);
        assert!(events[0].spectrum.contains('|'));
    }

    #[test]
    fn dcd_asserts_during_frame_and_releases_after() {
        let cfg = default_chan();
        let fs = 44_100;
        let dest: CallSign = "APRS".parse().unwrap();
        let src: CallSign = "N0CALL".parse().unwrap();
        let frame = Frame::new_ui(dest, src, &[], PID_NO_LAYER3, b"dcd").unwrap();
        let audio = modulate_frame(&frame, &cfg, fs);

        let mut bank = DemodBank::new(0, &cfg, fs).unwrap();
        assert!(!bank.dcd());
        let mut saw_busy = false;
        for s in audio {
            bank.process_sample(s);
            saw_busy |= bank.dcd();
        }
        assert!(saw_busy);
        // A quarter second of silence clears carrier detect.
        for _ in 0..fs / 4 {
            bank.process_sample(0);
        }
        assert!(!bank.dcd());
    }

    #[test]
    fn fanout_limit_enforced() {
        let cfg = ChannelConfig {
            subchannels: 9,
            slicers: 3,
            ..default_chan()
        };
        assert!(matches!(
            DemodBank::new(0, &cfg, 44_100),
            Err(ModemError::TooManySlicers { .. })
        ));
    }
}
