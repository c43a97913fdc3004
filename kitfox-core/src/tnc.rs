//! The assembled TNC: threads, dispatch, and the client surface.
//!
//! One receive thread per audio device feeds the demodulator banks and
//! DTMF detectors sample by sample. One transmit thread per channel runs
//! the channel-access loop. A single dispatcher drains the DLQ, routing
//! connected-mode frames into the link state machines and everything
//! else up to the client event channel. A timer thread sweeps the link
//! timers every 100 ms. Shutdown raises one flag and pokes every
//! condition variable; each thread exits at its next wake.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::audio::{deinterleave, SampleSink, SampleSource};
use crate::config::TncConfig;
use crate::dlq::{Dlq, DlqItem, ADVISORY_DEPTH};
use crate::dtmf::{DtmfDetector, DtmfSequencer};
use crate::errors::{ConfigError, LinkError, QueueError};
use crate::frame::{CallSign, Frame, FrameType, Modulo, UType, PID_NO_LAYER3};
use crate::link::{LinkEffect, LinkNotice, SessionKey, SessionTable};
use crate::logging::TncLogger;
use crate::modem::DemodBank;
use crate::ptt::{PttBackend, PttTiming};
use crate::transmit::{ChannelShared, ChannelTransmitter};
use crate::txq::{TxKind, TxPriority, TxQueue};

/// Synthetic addressing for DTMF command sequences handed to the DLQ.
const DTMF_SOURCE: &str = "DTMF";
const DTMF_DEST: &str = "TT";

/// Events delivered to the registered client consumer.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A decoded frame not consumed by the connected-mode machine.
    ReceivedFrame {
        chan: usize,
        subchan: i8,
        slicer: i8,
        frame: Frame,
        alevel: u8,
        retries: u8,
        spectrum: String,
    },
    LinkUp {
        key: SessionKey,
    },
    LinkDown {
        key: SessionKey,
        reason: LinkError,
    },
    ConnectedData {
        key: SessionKey,
        pid: u8,
        data: Vec<u8>,
    },
    XidResult {
        key: SessionKey,
        n1: usize,
        k: u8,
    },
    ProtocolWarning {
        key: SessionKey,
        message: String,
    },
    SeizeConfirm {
        chan: usize,
    },
}

/// Per-channel transmit-side wiring supplied by the device layer.
pub struct ChannelIo {
    pub sink: Box<dyn SampleSink>,
    pub ptt: Box<dyn PttBackend>,
    pub ptt_timing: PttTiming,
}

/// One opened audio device and the global channel indices it carries.
pub struct DeviceIo {
    pub source: Box<dyn SampleSource>,
    pub channels: Vec<usize>,
}

/// Point-in-time channel observables for the Status client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub dcd: bool,
    pub tx_inhibit: bool,
    pub queued_high: usize,
    pub queued_low: usize,
}

pub struct Tnc {
    config: TncConfig,
    dlq: Arc<Dlq>,
    txq: Arc<TxQueue>,
    sessions: Arc<SessionTable>,
    registered: Arc<Mutex<HashSet<CallSign>>>,
    shared: Vec<Arc<ChannelShared>>,
    events_tx: Sender<ClientEvent>,
    events_rx: Receiver<ClientEvent>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Tnc {
    pub fn new(config: TncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let channels = config.channels.len();
        let (events_tx, events_rx) = unbounded();
        Ok(Self {
            dlq: Arc::new(Dlq::new()),
            txq: Arc::new(TxQueue::new(channels)),
            sessions: Arc::new(SessionTable::new(config.link.clone())),
            registered: Arc::new(Mutex::new(HashSet::new())),
            shared: (0..channels)
                .map(|_| Arc::new(ChannelShared::default()))
                .collect(),
            events_tx,
            events_rx,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            config,
        })
    }

    /// Receiver side of the client event channel.
    pub fn events(&self) -> Receiver<ClientEvent> {
        self.events_rx.clone()
    }

    /// Spawn all threads. `devices` and `channel_io` come from the
    /// device layer; `channel_io[i]` serves global channel `i`.
    pub fn start(&mut self, devices: Vec<DeviceIo>, channel_io: Vec<ChannelIo>) {
        for (dev_index, device) in devices.into_iter().enumerate() {
            self.spawn_rx_thread(dev_index, device);
        }
        for (chan, io) in channel_io.into_iter().enumerate() {
            self.spawn_tx_thread(chan, io);
        }
        self.spawn_dispatcher();
        self.spawn_timer();
    }

    /// Raise the stop flag, wake everything, and join all threads.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.dlq.shutdown();
        self.txq.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    // -- client request surface --------------------------------------------

    pub fn register_callsign(&self, call: CallSign, client: usize) {
        self.dlq.append(DlqItem::RegisterCallsign { call, client });
    }

    pub fn unregister_callsign(&self, call: CallSign, client: usize) {
        self.dlq.append(DlqItem::UnregisterCallsign { call, client });
    }

    pub fn connect_request(&self, chan: usize, local: CallSign, remote: CallSign, client: usize) {
        self.dlq.append(DlqItem::ConnectRequest {
            chan,
            local,
            remote,
            client,
        });
    }

    pub fn disconnect_request(&self, chan: usize, local: CallSign, remote: CallSign, client: usize) {
        self.dlq.append(DlqItem::DisconnectRequest {
            chan,
            local,
            remote,
            client,
        });
    }

    pub fn send_data(
        &self,
        chan: usize,
        local: CallSign,
        remote: CallSign,
        client: usize,
        pid: u8,
        data: Vec<u8>,
    ) {
        self.dlq.append(DlqItem::TxDataRequest {
            chan,
            local,
            remote,
            client,
            pid,
            data,
        });
    }

    pub fn xid_request(&self, chan: usize, local: CallSign, remote: CallSign, client: usize) {
        self.dlq.append(DlqItem::XidRequest {
            chan,
            local,
            remote,
            client,
        });
    }

    /// Queue a raw frame for transmission (the KISS path). APRS-class
    /// traffic is subject to the queue's backpressure policy.
    pub fn transmit_frame(
        &self,
        chan: usize,
        prio: TxPriority,
        frame: Frame,
    ) -> Result<(), QueueError> {
        self.txq.append(chan, prio, TxKind::Aprs, frame).map(|_| ())
    }

    /// Ask a channel's transmitter to wake and seize the channel even
    /// with nothing queued.
    pub fn lm_seize_request(&self, chan: usize) -> Result<(), QueueError> {
        self.txq.lm_seize_request(chan)
    }

    pub fn status(&self, chan: usize) -> Option<ChannelStatus> {
        let shared = self.shared.get(chan)?;
        Some(ChannelStatus {
            dcd: shared.dcd.load(Ordering::Acquire),
            tx_inhibit: shared.tx_inhibit.load(Ordering::Acquire),
            queued_high: self.txq.count(chan, TxPriority::High, Default::default()),
            queued_low: self.txq.count(chan, TxPriority::Low, Default::default()),
        })
    }

    /// External carrier-detect or inhibit inputs, for channels whose
    /// config selects them.
    pub fn set_tx_inhibit(&self, chan: usize, inhibited: bool) {
        if let Some(shared) = self.shared.get(chan) {
            shared.tx_inhibit.store(inhibited, Ordering::Release);
        }
    }

    // -- threads ------------------------------------------------------------

    fn spawn_rx_thread(&mut self, dev_index: usize, mut device: DeviceIo) {
        let dev_cfg = self.config.devices[dev_index].clone();
        let chan_cfgs: Vec<_> = device
            .channels
            .iter()
            .map(|&c| (c, self.config.channels[c].clone()))
            .collect();
        let dlq = Arc::clone(&self.dlq);
        let shared: Vec<_> = device
            .channels
            .iter()
            .map(|&c| Arc::clone(&self.shared[c]))
            .collect();
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name(format!("kitfox-rx{}", dev_index))
            .spawn(move || {
                let mut logger = TncLogger::default();
                let mut banks = Vec::new();
                let mut dtmf = Vec::new();
                for (chan, cfg) in &chan_cfgs {
                    match DemodBank::new(*chan, cfg, dev_cfg.sample_rate) {
                        Ok(bank) => banks.push(bank),
                        Err(e) => {
                            logger.error("DEMOD", format!("channel {}: {}", chan, e));
                            return;
                        }
                    }
                    dtmf.push(if cfg.dtmf {
                        Some((DtmfDetector::new(dev_cfg.sample_rate), DtmfSequencer::new()))
                    } else {
                        None
                    });
                }

                let nch = chan_cfgs.len();
                let mut per_chan: Vec<Vec<i16>> = vec![Vec::new(); nch];
                while !stop.load(Ordering::Acquire) {
                    let block = match device.source.read() {
                        Ok(block) => block,
                        Err(e) => {
                            logger.warn("DEMOD", format!("device {}: {}", dev_index, e));
                            return;
                        }
                    };
                    for buf in per_chan.iter_mut() {
                        buf.clear();
                    }
                    deinterleave(&block, dev_cfg.channels as usize, &mut per_chan);

                    for (idx, samples) in per_chan.iter().enumerate() {
                        let chan = chan_cfgs[idx].0;
                        let bank = &mut banks[idx];
                        for &sample in samples {
                            bank.process_sample(sample);
                            if let Some((detector, sequencer)) = &mut dtmf[idx] {
                                if let Some(c) = detector.process_sample(sample) {
                                    if let Some(sequence) = sequencer.push(c) {
                                        push_dtmf_sequence(&dlq, &mut logger, chan, &sequence);
                                    }
                                }
                            }
                        }
                        shared[idx].dcd.store(bank.dcd(), Ordering::Release);
                        while let Some(ev) = bank.poll_event() {
                            match Frame::parse(&ev.body) {
                                Ok(frame) => {
                                    let depth = dlq.append(DlqItem::ReceivedFrame {
                                        chan: ev.chan,
                                        subchan: ev.subchan,
                                        slicer: ev.slicer,
                                        frame,
                                        alevel: ev.alevel,
                                        retries: ev.retries,
                                        spectrum: ev.spectrum,
                                    });
                                    if depth == ADVISORY_DEPTH {
                                        logger.warn(
                                            "DLQ",
                                            format!("{} items queued, consumer stalled?", depth),
                                        );
                                    }
                                }
                                Err(e) => {
                                    logger.info("HDLC", format!("malformed frame dropped: {}", e));
                                }
                            }
                        }
                    }
                }
            })
            .expect("spawn rx thread");
        self.handles.push(handle);
    }

    fn spawn_tx_thread(&mut self, chan: usize, mut io: ChannelIo) {
        let cfg = self.config.channels[chan].clone();
        let sample_rate = self.device_rate_for(chan);
        let txq = Arc::clone(&self.txq);
        let shared = Arc::clone(&self.shared[chan]);
        let stop = Arc::clone(&self.stop);
        let events = self.events_tx.clone();
        let seed = self.config.rng_seed;

        let handle = std::thread::Builder::new()
            .name(format!("kitfox-tx{}", chan))
            .spawn(move || {
                let on_seize: crate::transmit::SeizeNotify = {
                    let events = events.clone();
                    Box::new(move |chan| {
                        let _ = events.send(ClientEvent::SeizeConfirm { chan });
                    })
                };
                let mut tx = ChannelTransmitter::new(
                    chan,
                    cfg,
                    sample_rate,
                    io.ptt,
                    io.ptt_timing,
                    seed,
                    Some(on_seize),
                );
                tx.run(&txq, io.sink.as_mut(), &shared, &stop);
            })
            .expect("spawn tx thread");
        self.handles.push(handle);
    }

    fn device_rate_for(&self, chan: usize) -> u32 {
        let mut covered = 0usize;
        for dev in &self.config.devices {
            let next = covered + dev.channels as usize;
            if chan < next {
                return dev.sample_rate;
            }
            covered = next;
        }
        self.config
            .devices
            .first()
            .map(|d| d.sample_rate)
            .unwrap_or(44_100)
    }

    fn spawn_dispatcher(&mut self) {
        let dlq = Arc::clone(&self.dlq);
        let txq = Arc::clone(&self.txq);
        let sessions = Arc::clone(&self.sessions);
        let registered = Arc::clone(&self.registered);
        let events = self.events_tx.clone();
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name("kitfox-dispatch".to_string())
            .spawn(move || {
                let mut logger = TncLogger::default();
                while !stop.load(Ordering::Acquire) {
                    if !dlq.wait_while_empty() {
                        break;
                    }
                    while let Some(item) = dlq.remove() {
                        dispatch_item(item, &sessions, &registered, &txq, &events, &mut logger);
                    }
                }
            })
            .expect("spawn dispatcher");
        self.handles.push(handle);
    }

    fn spawn_timer(&mut self) {
        let sessions = Arc::clone(&self.sessions);
        let txq = Arc::clone(&self.txq);
        let events = self.events_tx.clone();
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name("kitfox-timer".to_string())
            .spawn(move || {
                let mut logger = TncLogger::default();
                while !stop.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(100));
                    let effects = sessions.tick(Instant::now());
                    execute_effects(effects, &txq, &events, &mut logger);
                }
            })
            .expect("spawn timer");
        self.handles.push(handle);
    }
}

impl Drop for Tnc {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}

fn push_dtmf_sequence(dlq: &Dlq, logger: &mut TncLogger, chan: usize, sequence: &str) {
    logger.info("DTMF", format!("channel {} sequence {}", chan, sequence));
    let src: CallSign = DTMF_SOURCE.parse().expect("static callsign");
    let dest: CallSign = DTMF_DEST.parse().expect("static callsign");
    match Frame::new_ui(dest, src, &[], PID_NO_LAYER3, sequence.as_bytes()) {
        Ok(frame) => {
            dlq.append(DlqItem::ReceivedFrame {
                chan,
                subchan: -1,
                slicer: -1,
                frame,
                alevel: 0,
                retries: 0,
                spectrum: String::new(),
            });
        }
        Err(e) => logger.warn("DTMF", format!("sequence not encodable: {}", e)),
    }
}

fn dispatch_item(
    item: DlqItem,
    sessions: &SessionTable,
    registered: &Mutex<HashSet<CallSign>>,
    txq: &TxQueue,
    events: &Sender<ClientEvent>,
    logger: &mut TncLogger,
) {
    let now = Instant::now();
    match item {
        DlqItem::ReceivedFrame {
            chan,
            subchan,
            slicer,
            frame,
            alevel,
            retries,
            spectrum,
        } => {
            let is_ui = matches!(
                frame.frame_type(Modulo::Eight),
                Ok(FrameType::U {
                    kind: UType::Ui,
                    ..
                })
            );
            // UI traffic is always client-bound; anything else addressed
            // to a registered callsign belongs to the link machine.
            let for_link = !is_ui
                && registered
                    .lock()
                    .expect("registered poisoned")
                    .contains(&frame.dest());
            if for_link {
                let effects = sessions.frame_received(chan, frame.dest(), &frame, now);
                execute_effects(effects, txq, events, logger);
            } else {
                let _ = events.send(ClientEvent::ReceivedFrame {
                    chan,
                    subchan,
                    slicer,
                    frame,
                    alevel,
                    retries,
                    spectrum,
                });
            }
        }
        DlqItem::ConnectRequest {
            chan,
            local,
            remote,
            ..
        } => {
            registered
                .lock()
                .expect("registered poisoned")
                .insert(local);
            let key = SessionKey {
                chan,
                local,
                remote,
            };
            let effects = sessions.connect(key, now);
            execute_effects(effects, txq, events, logger);
        }
        DlqItem::DisconnectRequest {
            chan,
            local,
            remote,
            ..
        } => {
            let key = SessionKey {
                chan,
                local,
                remote,
            };
            let effects = sessions.disconnect(key, now);
            execute_effects(effects, txq, events, logger);
        }
        DlqItem::TxDataRequest {
            chan,
            local,
            remote,
            pid,
            data,
            ..
        } => {
            let key = SessionKey {
                chan,
                local,
                remote,
            };
            let effects = sessions.send_data(key, pid, &data, now);
            execute_effects(effects, txq, events, logger);
        }
        DlqItem::RegisterCallsign { call, .. } => {
            registered.lock().expect("registered poisoned").insert(call);
        }
        DlqItem::UnregisterCallsign { call, .. } => {
            registered
                .lock()
                .expect("registered poisoned")
                .remove(&call);
        }
        DlqItem::XidRequest {
            chan,
            local,
            remote,
            ..
        } => {
            let key = SessionKey {
                chan,
                local,
                remote,
            };
            let effects = sessions.xid_query(key, now);
            execute_effects(effects, txq, events, logger);
        }
    }
}

fn execute_effects(
    effects: Vec<LinkEffect>,
    txq: &TxQueue,
    events: &Sender<ClientEvent>,
    logger: &mut TncLogger,
) {
    for effect in effects {
        match effect {
            LinkEffect::Transmit { chan, prio, frame } => {
                match txq.append(chan, prio, TxKind::Link, frame) {
                    Ok(info) if info.congested => {
                        logger.warn("TXQ", format!("channel {} deeply queued", chan));
                    }
                    Ok(_) => {}
                    Err(e) => logger.error("TXQ", format!("link frame lost: {}", e)),
                }
            }
            LinkEffect::Upcall(notice) => {
                let event = match notice {
                    LinkNotice::LinkUp { key } => ClientEvent::LinkUp { key },
                    LinkNotice::LinkDown { key, reason } => {
                        ClientEvent::LinkDown { key, reason }
                    }
                    LinkNotice::Data { key, pid, data } => {
                        ClientEvent::ConnectedData { key, pid, data }
                    }
                    LinkNotice::XidResult { key, n1, k } => {
                        ClientEvent::XidResult { key, n1, k }
                    }
                    LinkNotice::ProtocolWarning { key, message } => {
                        logger.warn("LINK", format!("{:?}: {}", key, message));
                        ClientEvent::ProtocolWarning { key, message }
                    }
                };
                let _ = events.send(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::LoopbackDevice;
    use crate::config::{ChannelConfig, DeviceConfig};
    use crate::ptt::NullPtt;

    fn loopback_tnc() -> (Tnc, LoopbackDevice) {
        let config = TncConfig {
            devices: vec![DeviceConfig::default()],
            channels: vec![ChannelConfig {
                full_duplex: true,
                ..ChannelConfig::default()
            }],
            rng_seed: Some(99),
            ..TncConfig::default()
        };
        let mut tnc = Tnc::new(config).unwrap();
        let pipe = LoopbackDevice::new(2048);
        let devices = vec![DeviceIo {
            source: Box::new(pipe.clone()),
            channels: vec![0],
        }];
        let io = vec![ChannelIo {
            sink: Box::new(pipe.clone()),
            ptt: Box::new(NullPtt::default()),
            ptt_timing: PttTiming::default(),
        }];
        tnc.start(devices, io);
        (tnc, pipe)
    }

    #[test]
    fn transmitted_ui_frame_loops_back_to_client() {
        let (mut tnc, pipe) = loopback_tnc();
        let events = tnc.events();

        let dest: CallSign = "APRS".parse().unwrap();
        let src: CallSign = "N0CALL".parse().unwrap();
        let frame = Frame::new_ui(dest, src, &[], PID_NO_LAYER3, b"loop").unwrap();
        tnc.transmit_frame(0, TxPriority::Low, frame.clone()).unwrap();

        let deadline = Duration::from_secs(10);
        let received = loop {
            match events.recv_timeout(deadline) {
                Ok(ClientEvent::ReceivedFrame { frame, .. }) => break frame,
                Ok(_) => continue,
                Err(e) => panic!("no frame event: {}", e),
            }
        };
        assert_eq!(received.as_bytes(), frame.as_bytes());
        // Unblock the receive thread before joining.
        pipe.close();
        tnc.shutdown();
    }

    #[test]
    fn status_reports_idle_channel() {
        let (mut tnc, pipe) = loopback_tnc();
        let status = tnc.status(0).unwrap();
        assert!(!status.tx_inhibit);
        assert_eq!(status.queued_high + status.queued_low, 0);
        assert!(tnc.status(5).is_none());
        pipe.close();
        tnc.shutdown();
    }
}
