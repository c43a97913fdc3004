//! Channel access and the per-channel transmit loop.
//!
//! Half-duplex channels contend for the air with p-persistent CSMA:
//! after the receiver goes idle, wait DWAIT, then transmit with
//! probability PERSIST/256 per SLOTTIME. Winning the lottery keys PTT,
//! fills TXDELAY with flags so the remote DPLL can lock, drains the
//! queue HI-before-LO, fills TXTAIL, and unkeys. Full-duplex channels
//! skip the contention entirely but keep the keying sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::audio::SampleSink;
use crate::config::{ChannelConfig, TxFraming};
use crate::errors::DeviceError;
use crate::fec::{fx25, il2p};
use crate::hdlc::stuff::HdlcEncoder;
use crate::logging::TncLogger;
use crate::modem::modulate::Modulator;
use crate::ptt::{PttBackend, PttTiming};
use crate::txq::{TxKind, TxQueue};

/// Flags separating frames inside one burst.
const INTERFRAME_FLAGS: usize = 2;

/// Channel state shared between the receive and transmit threads.
#[derive(Debug, Default)]
pub struct ChannelShared {
    /// Data carrier detect, written by the receive thread.
    pub dcd: AtomicBool,
    /// External transmit-inhibit input.
    pub tx_inhibit: AtomicBool,
}

impl ChannelShared {
    pub fn busy(&self) -> bool {
        self.dcd.load(Ordering::Acquire) || self.tx_inhibit.load(Ordering::Acquire)
    }
}

/// One p-persistence draw: transmit when a uniform byte lands at or
/// below the PERSIST setting.
pub fn persist_lottery(rng: &mut impl Rng, persist: u8) -> bool {
    rng.gen::<u8>() <= persist
}

/// Callback for burst-level notifications (seize confirmations).
pub type SeizeNotify = Box<dyn Fn(usize) + Send>;

pub struct ChannelTransmitter {
    chan: usize,
    cfg: ChannelConfig,
    modulator: Modulator,
    ptt: Box<dyn PttBackend>,
    ptt_timing: PttTiming,
    rng: ChaCha8Rng,
    logger: TncLogger,
    on_seize: Option<SeizeNotify>,
}

impl ChannelTransmitter {
    pub fn new(
        chan: usize,
        cfg: ChannelConfig,
        sample_rate: u32,
        ptt: Box<dyn PttBackend>,
        ptt_timing: PttTiming,
        rng_seed: Option<u64>,
        on_seize: Option<SeizeNotify>,
    ) -> Self {
        let rng = match rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed ^ chan as u64),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            chan,
            modulator: Modulator::new(&cfg, sample_rate),
            cfg,
            ptt,
            ptt_timing,
            rng,
            logger: TncLogger::default(),
            on_seize,
        }
    }

    pub fn logger(&self) -> &TncLogger {
        &self.logger
    }

    /// The transmit thread body. Returns when the queue shuts down or
    /// the sink fails.
    pub fn run(&mut self, txq: &TxQueue, sink: &mut dyn SampleSink, shared: &Arc<ChannelShared>, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            if !txq.wait_for_work(self.chan) {
                break;
            }
            if !self.cfg.full_duplex && !self.channel_access(shared, stop) {
                break;
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
            match self.transmit_burst(txq, sink) {
                Ok(()) => {}
                Err(e) => {
                    self.logger.error("PTT", format!("transmit failed: {}", e));
                    break;
                }
            }
        }
    }

    /// Steps 3 and 4: DWAIT and the CSMA lottery. Returns false on
    /// shutdown.
    fn channel_access(&mut self, shared: &Arc<ChannelShared>, stop: &AtomicBool) -> bool {
        let slot = Duration::from_millis(self.cfg.slottime.max(1) as u64 * 10);
        let grace = Duration::from_secs(10);
        let started = std::time::Instant::now();
        let mut warned = false;
        loop {
            if stop.load(Ordering::Acquire) {
                return false;
            }
            if shared.busy() {
                if !warned && started.elapsed() > grace {
                    warned = true;
                    self.logger.warn(
                        "CSMA",
                        format!("channel {} blocked for {:?}, frames remain queued", self.chan, grace),
                    );
                }
                std::thread::sleep(slot.min(Duration::from_millis(10)));
                continue;
            }
            if self.cfg.dwait > 0 {
                std::thread::sleep(Duration::from_millis(self.cfg.dwait as u64 * 10));
                if shared.busy() {
                    continue;
                }
            }
            if persist_lottery(&mut self.rng, self.cfg.persist) {
                return true;
            }
            std::thread::sleep(slot);
        }
    }

    /// Steps 5-7: key up, drain, key down. The audio for the whole burst
    /// is assembled first so the keying edges bracket it exactly.
    fn transmit_burst(&mut self, txq: &TxQueue, sink: &mut dyn SampleSink) -> Result<(), DeviceError> {
        let mut enc = HdlcEncoder::new();
        self.push_preamble(&mut enc);

        let hang = Duration::from_millis((self.cfg.txtail.max(1) as u64) * 10);
        let mut sent_frames = 0usize;
        loop {
            while let Some(entry) = txq.remove(self.chan) {
                if entry.kind == TxKind::Seize {
                    if let Some(notify) = &self.on_seize {
                        notify(self.chan);
                    }
                    continue;
                }
                let Some(frame) = entry.frame else { continue };
                if sent_frames > 0 {
                    enc.push_flags(INTERFRAME_FLAGS);
                }
                if let Err(e) = self.push_frame(&mut enc, frame.as_bytes()) {
                    self.logger.warn("TXQ", format!("frame not encodable: {}", e));
                    continue;
                }
                sent_frames += 1;
            }
            // Hang window: stay keyed briefly in case more work lands.
            if !txq.wait_for_work_timeout(self.chan, hang) {
                break;
            }
            enc.push_flags(INTERFRAME_FLAGS);
        }

        self.push_tail(&mut enc);

        let mut audio = Vec::with_capacity(enc.len() * 40);
        let bits = enc.into_bits();
        self.modulator.modulate_bits(&bits, &mut audio);
        self.modulator.flush(&mut audio);

        self.ptt.assert()?;
        if self.ptt_timing.on_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.ptt_timing.on_delay_ms));
        }
        let result = sink.write(&audio);
        if self.ptt_timing.off_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.ptt_timing.off_delay_ms));
        }
        self.ptt.deassert()?;
        self.logger.debug(
            "PTT",
            format!("burst of {} frames, {} samples", sent_frames, audio.len()),
        );
        result
    }

    /// TXDELAY fill: flags for the HDLC-derived framings, 0x55 bytes for
    /// IL2P clock recovery.
    fn push_preamble(&mut self, enc: &mut HdlcEncoder) {
        match self.cfg.tx_framing {
            TxFraming::Il2p => {
                for _ in 0..self.cfg.txdelay_flags() {
                    enc.push_raw_byte_msb(0x55);
                }
            }
            _ => enc.push_flags(self.cfg.txdelay_flags()),
        }
    }

    fn push_tail(&mut self, enc: &mut HdlcEncoder) {
        match self.cfg.tx_framing {
            TxFraming::Il2p => {
                for _ in 0..self.cfg.txtail_flags() {
                    enc.push_raw_byte_msb(0x55);
                }
            }
            _ => enc.push_flags(self.cfg.txtail_flags()),
        }
    }

    fn push_frame(
        &mut self,
        enc: &mut HdlcEncoder,
        body: &[u8],
    ) -> Result<(), crate::errors::KitfoxError> {
        match self.cfg.tx_framing {
            TxFraming::Hdlc => {
                enc.push_flag();
                enc.push_body(body);
                enc.push_flag();
            }
            TxFraming::Fx25 => {
                let bytes = fx25::wrap_frame(body, self.cfg.fx25_strength)?;
                for b in bytes {
                    enc.push_raw_byte(b);
                }
            }
            TxFraming::Il2p => {
                let bytes =
                    il2p::wrap_frame(body, self.cfg.il2p_strength, self.cfg.il2p_polarity)?;
                for b in bytes {
                    enc.push_raw_byte_msb(b);
                }
            }
        }
        Ok(())
    }
}
