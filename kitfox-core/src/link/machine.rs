//! The per-session AX.25 state machine.
//!
//! Implements the v2.2 data link with modulo-128 windowing, falling back
//! to v2.0 modulo-8 when SABME goes unanswered (MAXV22 tries) or the
//! peer is configured as v2.0-only. Timers are stored as deadlines and
//! evaluated by [`timer_tick`]; every transition appends its outward
//! effects to a caller-supplied vector so all session state changes stay
//! under the table lock while transmissions and upcalls happen outside.
//!
//! [`timer_tick`]: LinkSession::timer_tick

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::LinkConfig;
use crate::errors::LinkError;
use crate::frame::{CmdRes, Frame, FrameType, Modulo, SType, UType};
use crate::txq::TxPriority;

use super::{LinkEffect, LinkNotice, SessionKey};

/// Cap on exponential T1 back-off.
const T1V_MAX: Duration = Duration::from_secs(30);
const T1V_MIN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// SABM sent, awaiting UA (v2.0).
    AwaitingConnect,
    /// SABME sent, awaiting UA (v2.2).
    AwaitingConnect22,
    Connected,
    /// T1 ran out in Connected; polling the peer.
    TimerRecovery,
    /// DISC sent, awaiting UA.
    AwaitingRelease,
}

pub struct LinkSession {
    key: SessionKey,
    cfg: LinkConfig,
    state: LinkState,
    modulo: Modulo,

    vs: u8,
    vr: u8,
    va: u8,
    /// Received I frames not yet acknowledged.
    ack_pending: u32,
    /// Negotiated window.
    k: u8,
    /// Negotiated maximum information length.
    n1: usize,
    /// Retry counter.
    rc: u32,
    srej_enabled: bool,
    peer_busy: bool,
    own_busy: bool,
    /// A REJ for the current gap is already outstanding.
    rej_sent: bool,

    t1: Option<Instant>,
    t2: Option<Instant>,
    t3: Option<Instant>,
    /// When T1 was last started with a fresh transmission (for SRT).
    t1_started: Option<Instant>,
    srt: Duration,
    t1v: Duration,

    /// Data accepted from the client but not yet assigned an N(S).
    pending: VecDeque<(u8, Vec<u8>)>,
    /// Sent but unacknowledged I frames, indexed by N(S).
    sent: Vec<Option<(u8, Vec<u8>)>>,
    /// Out-of-order frames held back for SREJ resequencing.
    reseq: BTreeMap<u8, (u8, Vec<u8>)>,

    /// SABME attempts, for the MAXV22 fallback.
    sabme_tries: u32,
    xid_pending: bool,
    holddown_until: Option<Instant>,
}

impl LinkSession {
    pub fn new(key: SessionKey, cfg: LinkConfig) -> Self {
        let t1v = Duration::from_millis(cfg.t1v_ms);
        Self {
            key,
            state: LinkState::Disconnected,
            modulo: Modulo::Eight,
            vs: 0,
            vr: 0,
            va: 0,
            ack_pending: 0,
            k: cfg.maxframe,
            n1: cfg.paclen,
            rc: 0,
            srej_enabled: false,
            peer_busy: false,
            own_busy: false,
            rej_sent: false,
            t1: None,
            t2: None,
            t3: None,
            t1_started: None,
            srt: t1v / 2,
            t1v,
            pending: VecDeque::new(),
            sent: vec![None; 128],
            reseq: BTreeMap::new(),
            sabme_tries: 0,
            xid_pending: false,
            holddown_until: None,
            cfg,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn modulo(&self) -> Modulo {
        self.modulo
    }

    pub fn sequence_vars(&self) -> (u8, u8, u8) {
        (self.vs, self.vr, self.va)
    }

    pub fn window(&self) -> u8 {
        self.k
    }

    /// Negotiated maximum information field length.
    pub fn max_info_len(&self) -> usize {
        self.n1
    }

    /// True once the post-disconnect hold-down has elapsed.
    pub fn reapable(&self, now: Instant) -> bool {
        self.state == LinkState::Disconnected
            && self.holddown_until.map_or(false, |until| now >= until)
    }

    fn m(&self) -> u8 {
        self.modulo.value() as u8
    }

    fn peer_is_v20(&self) -> bool {
        let remote = self.key.remote.to_string();
        self.cfg.v20_peers.iter().any(|p| p == &remote)
    }

    fn peer_skips_xid(&self) -> bool {
        let remote = self.key.remote.to_string();
        self.cfg.no_xid_peers.iter().any(|p| p == &remote)
    }

    // -- outbound helpers ---------------------------------------------------

    fn transmit(&self, frame: Frame, prio: TxPriority, fx: &mut Vec<LinkEffect>) {
        fx.push(LinkEffect::Transmit {
            chan: self.key.chan,
            prio,
            frame,
        });
    }

    fn send_u(&self, kind: UType, cr: CmdRes, pf: bool, info: &[u8], fx: &mut Vec<LinkEffect>) {
        let frame = Frame::new_u(self.key.remote, self.key.local, kind, cr, pf, info);
        self.transmit(frame, TxPriority::High, fx);
    }

    fn send_s(&mut self, kind: SType, cr: CmdRes, pf: bool, fx: &mut Vec<LinkEffect>) {
        let frame = Frame::new_s(
            self.key.remote,
            self.key.local,
            kind,
            self.modulo,
            self.vr,
            pf,
            cr,
        );
        self.ack_pending = 0;
        self.t2 = None;
        self.transmit(frame, TxPriority::High, fx);
    }

    fn enquiry_response(&mut self, fx: &mut Vec<LinkEffect>) {
        let kind = if self.own_busy { SType::Rnr } else { SType::Rr };
        self.send_s(kind, CmdRes::Response, true, fx);
    }

    // -- timers -------------------------------------------------------------

    fn start_t1(&mut self, now: Instant) {
        self.t1 = Some(now + self.t1v);
        if self.rc == 0 {
            self.t1_started = Some(now);
        }
    }

    fn stop_t1(&mut self) {
        self.t1 = None;
        self.t1_started = None;
    }

    fn start_t3(&mut self, now: Instant) {
        self.t3 = if self.cfg.t3_ms > 0 {
            Some(now + Duration::from_millis(self.cfg.t3_ms))
        } else {
            None
        };
    }

    fn schedule_ack(&mut self, now: Instant) {
        if self.t2.is_none() {
            self.t2 = Some(now + Duration::from_millis(self.cfg.t2_ms));
        }
    }

    fn measure_rtt(&mut self, now: Instant) {
        if self.rc == 0 {
            if let Some(started) = self.t1_started.take() {
                let rtt = now.saturating_duration_since(started);
                self.srt = (self.srt * 7 + rtt) / 8;
                self.t1v = (self.srt * 2).clamp(T1V_MIN, T1V_MAX);
            }
        }
    }

    // -- sequence arithmetic ------------------------------------------------

    fn seq_add(&self, a: u8, b: u8) -> u8 {
        (a.wrapping_add(b)) % self.m()
    }

    fn seq_sub(&self, a: u8, b: u8) -> u8 {
        (a.wrapping_add(self.m()).wrapping_sub(b)) % self.m()
    }

    /// N(R) is valid when it acknowledges something in [V(a), V(s)].
    fn nr_valid(&self, nr: u8) -> bool {
        self.seq_sub(nr, self.va) <= self.seq_sub(self.vs, self.va)
    }

    fn window_full(&self) -> bool {
        self.seq_sub(self.vs, self.va) >= self.k
    }

    /// Release acknowledged frames and advance V(a).
    fn ack_to(&mut self, nr: u8, now: Instant) {
        if self.va != nr {
            self.measure_rtt(now);
        }
        while self.va != nr {
            self.sent[self.va as usize] = None;
            self.va = self.seq_add(self.va, 1);
        }
    }

    // -- session reset ------------------------------------------------------

    fn establish(&mut self, modulo: Modulo, now: Instant) {
        self.modulo = modulo;
        self.state = LinkState::Connected;
        self.vs = 0;
        self.vr = 0;
        self.va = 0;
        self.ack_pending = 0;
        self.rc = 0;
        self.peer_busy = false;
        self.own_busy = false;
        self.rej_sent = false;
        self.srej_enabled = false;
        self.k = match modulo {
            Modulo::Eight => self.cfg.maxframe,
            Modulo::OneTwentyEight => self.cfg.emaxframe,
        };
        self.n1 = self.cfg.paclen;
        self.sent.iter_mut().for_each(|s| *s = None);
        self.reseq.clear();
        self.stop_t1();
        self.t2 = None;
        self.start_t3(now);
        self.holddown_until = None;
    }

    fn enter_disconnected(&mut self, now: Instant, reason: LinkError, fx: &mut Vec<LinkEffect>) {
        self.state = LinkState::Disconnected;
        self.stop_t1();
        self.t2 = None;
        self.t3 = None;
        self.pending.clear();
        self.sent.iter_mut().for_each(|s| *s = None);
        self.reseq.clear();
        self.holddown_until = Some(now + Duration::from_millis(self.cfg.holddown_ms));
        fx.push(LinkEffect::Upcall(LinkNotice::LinkDown {
            key: self.key,
            reason,
        }));
    }

    // -- client requests ----------------------------------------------------

    pub fn connect_request(&mut self, now: Instant, fx: &mut Vec<LinkEffect>) {
        self.rc = 0;
        self.sabme_tries = 0;
        if self.peer_is_v20() {
            self.state = LinkState::AwaitingConnect;
            self.modulo = Modulo::Eight;
            self.send_u(UType::Sabm, CmdRes::Command, true, &[], fx);
        } else {
            self.state = LinkState::AwaitingConnect22;
            self.modulo = Modulo::OneTwentyEight;
            self.sabme_tries = 1;
            self.send_u(UType::Sabme, CmdRes::Command, true, &[], fx);
        }
        self.start_t1(now);
    }

    pub fn disconnect_request(&mut self, now: Instant, fx: &mut Vec<LinkEffect>) {
        match self.state {
            LinkState::Disconnected => {}
            LinkState::AwaitingConnect | LinkState::AwaitingConnect22 => {
                self.enter_disconnected(
                    now,
                    LinkError::Disconnected {
                        remote: self.key.remote.to_string(),
                    },
                    fx,
                );
            }
            _ => {
                self.state = LinkState::AwaitingRelease;
                self.rc = 0;
                self.send_u(UType::Disc, CmdRes::Command, true, &[], fx);
                self.start_t1(now);
            }
        }
    }

    /// Queue data, splitting at the negotiated N1, and push the window.
    pub fn data_request(&mut self, pid: u8, data: &[u8], now: Instant, fx: &mut Vec<LinkEffect>) {
        if !matches!(
            self.state,
            LinkState::Connected | LinkState::TimerRecovery
        ) {
            fx.push(LinkEffect::Upcall(LinkNotice::LinkDown {
                key: self.key,
                reason: LinkError::Disconnected {
                    remote: self.key.remote.to_string(),
                },
            }));
            return;
        }
        if data.is_empty() {
            return;
        }
        for chunk in data.chunks(self.n1.max(1)) {
            self.pending.push_back((pid, chunk.to_vec()));
        }
        self.push_iframes(now, fx);
    }

    pub fn xid_request(&mut self, now: Instant, fx: &mut Vec<LinkEffect>) {
        if matches!(self.state, LinkState::Connected | LinkState::TimerRecovery) {
            self.send_xid_command(now, fx);
        }
    }

    fn send_xid_command(&mut self, now: Instant, fx: &mut Vec<LinkEffect>) {
        let info = xid_encode(self.cfg.paclen, self.k, self.modulo == Modulo::OneTwentyEight);
        self.send_u(UType::Xid, CmdRes::Command, true, &info, fx);
        self.xid_pending = true;
        self.start_t1(now);
    }

    /// Send as many queued I frames as the window and peer allow.
    fn push_iframes(&mut self, now: Instant, fx: &mut Vec<LinkEffect>) {
        while !self.pending.is_empty() && !self.window_full() && !self.peer_busy {
            let (pid, data) = self.pending.pop_front().expect("checked non-empty");
            let ns = self.vs;
            let frame = Frame::new_i(
                self.key.remote,
                self.key.local,
                self.modulo,
                self.vr,
                ns,
                false,
                pid,
                &data,
            )
            .expect("chunked at n1");
            self.sent[ns as usize] = Some((pid, data));
            self.vs = self.seq_add(self.vs, 1);
            self.ack_pending = 0;
            self.t2 = None;
            self.transmit(frame, TxPriority::Low, fx);
            if self.t1.is_none() {
                self.start_t1(now);
            }
        }
    }

    /// Retransmit everything from V(a) up to V(s), in order.
    fn retransmit_from(&mut self, start: u8, now: Instant, fx: &mut Vec<LinkEffect>) {
        let count = self.seq_sub(self.vs, start);
        let mut ns = start;
        for _ in 0..count {
            if let Some((pid, data)) = self.sent[ns as usize].clone() {
                let frame = Frame::new_i(
                    self.key.remote,
                    self.key.local,
                    self.modulo,
                    self.vr,
                    ns,
                    false,
                    pid,
                    &data,
                )
                .expect("previously sent");
                self.transmit(frame, TxPriority::Low, fx);
            }
            ns = self.seq_add(ns, 1);
        }
        self.rc += 1;
        self.start_t1(now);
    }

    // -- inbound ------------------------------------------------------------

    pub fn frame_received(&mut self, frame: &Frame, now: Instant, fx: &mut Vec<LinkEffect>) {
        let ftype = match frame.frame_type(self.modulo) {
            Ok(t) => t,
            Err(e) => {
                fx.push(LinkEffect::Upcall(LinkNotice::ProtocolWarning {
                    key: self.key,
                    message: format!("undecodable control field: {}", e),
                }));
                return;
            }
        };
        let cr = frame.cmd_res();

        match ftype {
            FrameType::U { kind, pf } => self.unnumbered(kind, cr, pf, frame, now, fx),
            FrameType::S { kind, nr, pf } => self.supervisory(kind, nr, cr, pf, now, fx),
            FrameType::I { nr, ns, pf } => self.information(frame, nr, ns, pf, now, fx),
        }
    }

    fn unnumbered(
        &mut self,
        kind: UType,
        cr: CmdRes,
        pf: bool,
        frame: &Frame,
        now: Instant,
        fx: &mut Vec<LinkEffect>,
    ) {
        match kind {
            UType::Sabm | UType::Sabme => {
                let modulo = if kind == UType::Sabme {
                    Modulo::OneTwentyEight
                } else {
                    Modulo::Eight
                };
                let was_connected = matches!(
                    self.state,
                    LinkState::Connected | LinkState::TimerRecovery
                );
                self.send_u(UType::Ua, CmdRes::Response, pf, &[], fx);
                self.establish(modulo, now);
                if was_connected {
                    fx.push(LinkEffect::Upcall(LinkNotice::ProtocolWarning {
                        key: self.key,
                        message: "link reset by peer".to_string(),
                    }));
                } else {
                    fx.push(LinkEffect::Upcall(LinkNotice::LinkUp { key: self.key }));
                }
            }
            UType::Disc => {
                match self.state {
                    LinkState::Disconnected => {
                        self.send_u(UType::Dm, CmdRes::Response, pf, &[], fx);
                    }
                    _ => {
                        self.send_u(UType::Ua, CmdRes::Response, pf, &[], fx);
                        self.enter_disconnected(
                            now,
                            LinkError::Disconnected {
                                remote: self.key.remote.to_string(),
                            },
                            fx,
                        );
                    }
                }
            }
            UType::Ua => match self.state {
                LinkState::AwaitingConnect | LinkState::AwaitingConnect22 => {
                    let modulo = if self.state == LinkState::AwaitingConnect22 {
                        Modulo::OneTwentyEight
                    } else {
                        Modulo::Eight
                    };
                    self.measure_rtt(now);
                    self.establish(modulo, now);
                    fx.push(LinkEffect::Upcall(LinkNotice::LinkUp { key: self.key }));
                    if modulo == Modulo::OneTwentyEight && !self.peer_skips_xid() {
                        self.send_xid_command(now, fx);
                    }
                }
                LinkState::AwaitingRelease => {
                    self.enter_disconnected(
                        now,
                        LinkError::Disconnected {
                            remote: self.key.remote.to_string(),
                        },
                        fx,
                    );
                }
                _ => {
                    fx.push(LinkEffect::Upcall(LinkNotice::ProtocolWarning {
                        key: self.key,
                        message: "unexpected UA".to_string(),
                    }));
                }
            },
            UType::Dm => match self.state {
                LinkState::AwaitingConnect22 => {
                    // Peer refuses SABME: fall straight back to v2.0.
                    self.state = LinkState::AwaitingConnect;
                    self.modulo = Modulo::Eight;
                    self.rc = 0;
                    self.send_u(UType::Sabm, CmdRes::Command, true, &[], fx);
                    self.start_t1(now);
                }
                LinkState::AwaitingRelease => {
                    self.enter_disconnected(
                        now,
                        LinkError::Disconnected {
                            remote: self.key.remote.to_string(),
                        },
                        fx,
                    );
                }
                LinkState::Disconnected => {}
                _ => {
                    self.enter_disconnected(
                        now,
                        LinkError::Disconnected {
                            remote: self.key.remote.to_string(),
                        },
                        fx,
                    );
                }
            },
            UType::Frmr => {
                fx.push(LinkEffect::Upcall(LinkNotice::LinkDown {
                    key: self.key,
                    reason: LinkError::LinkReset {
                        remote: self.key.remote.to_string(),
                    },
                }));
                // Re-establish with the current modulo preference.
                self.rc = 0;
                if self.modulo == Modulo::OneTwentyEight {
                    self.state = LinkState::AwaitingConnect22;
                    self.sabme_tries = 1;
                    self.send_u(UType::Sabme, CmdRes::Command, true, &[], fx);
                } else {
                    self.state = LinkState::AwaitingConnect;
                    self.send_u(UType::Sabm, CmdRes::Command, true, &[], fx);
                }
                self.start_t1(now);
            }
            UType::Xid => {
                let info = frame.info(self.modulo);
                let theirs = xid_decode(info);
                if cr == CmdRes::Command {
                    if let Some(theirs) = theirs {
                        self.apply_xid(&theirs);
                    }
                    let reply = xid_encode(self.n1, self.k, self.srej_enabled);
                    self.send_u(UType::Xid, CmdRes::Response, pf, &reply, fx);
                    fx.push(LinkEffect::Upcall(LinkNotice::XidResult {
                        key: self.key,
                        n1: self.n1,
                        k: self.k,
                    }));
                } else {
                    if let Some(theirs) = theirs {
                        self.apply_xid(&theirs);
                    }
                    self.xid_pending = false;
                    self.stop_t1();
                    fx.push(LinkEffect::Upcall(LinkNotice::XidResult {
                        key: self.key,
                        n1: self.n1,
                        k: self.k,
                    }));
                }
            }
            UType::Test => {
                if cr == CmdRes::Command {
                    let echo = frame.info(self.modulo).to_vec();
                    self.send_u(UType::Test, CmdRes::Response, pf, &echo, fx);
                }
            }
            UType::Ui => {
                // UI traffic is routed to the client by the dispatcher;
                // reaching a session is a peer quirk, not an error.
            }
        }
    }

    fn supervisory(
        &mut self,
        kind: SType,
        nr: u8,
        cr: CmdRes,
        pf: bool,
        now: Instant,
        fx: &mut Vec<LinkEffect>,
    ) {
        if !matches!(
            self.state,
            LinkState::Connected | LinkState::TimerRecovery
        ) {
            if cr == CmdRes::Command {
                self.send_u(UType::Dm, CmdRes::Response, pf, &[], fx);
            }
            return;
        }
        if !self.nr_valid(nr) {
            self.enter_disconnected(
                now,
                LinkError::FrameRejected {
                    remote: self.key.remote.to_string(),
                    reason: format!("N(R)={} outside V(a)..V(s)", nr),
                },
                fx,
            );
            return;
        }

        match kind {
            SType::Rr | SType::Rnr => {
                self.peer_busy = kind == SType::Rnr;
                self.ack_to(nr, now);
                if cr == CmdRes::Command && pf {
                    self.enquiry_response(fx);
                } else if self.state == LinkState::TimerRecovery
                    && cr == CmdRes::Response
                    && pf
                {
                    // Poll answered: leave recovery and resume.
                    self.rc = 0;
                    self.state = LinkState::Connected;
                    if self.va == self.vs {
                        self.stop_t1();
                        self.start_t3(now);
                    } else {
                        self.retransmit_from(self.va, now, fx);
                        self.rc = 0;
                    }
                }
                if self.state == LinkState::Connected {
                    if self.va == self.vs {
                        self.stop_t1();
                        self.start_t3(now);
                    } else {
                        self.start_t1(now);
                    }
                    self.push_iframes(now, fx);
                }
            }
            SType::Rej => {
                self.peer_busy = false;
                self.ack_to(nr, now);
                if cr == CmdRes::Command && pf {
                    self.enquiry_response(fx);
                }
                self.retransmit_from(nr, now, fx);
                self.rc = 0;
                if self.state == LinkState::TimerRecovery {
                    self.state = LinkState::Connected;
                }
            }
            SType::Srej => {
                if cr == CmdRes::Command {
                    fx.push(LinkEffect::Upcall(LinkNotice::ProtocolWarning {
                        key: self.key,
                        message: "SREJ received as command; treating as response".to_string(),
                    }));
                }
                // F=1 also acknowledges everything below N(R).
                if pf {
                    self.ack_to(nr, now);
                }
                if let Some((pid, data)) = self.sent[nr as usize].clone() {
                    let frame = Frame::new_i(
                        self.key.remote,
                        self.key.local,
                        self.modulo,
                        self.vr,
                        nr,
                        false,
                        pid,
                        &data,
                    )
                    .expect("previously sent");
                    self.transmit(frame, TxPriority::Low, fx);
                    self.start_t1(now);
                }
            }
        }
    }

    fn information(
        &mut self,
        frame: &Frame,
        nr: u8,
        ns: u8,
        pf: bool,
        now: Instant,
        fx: &mut Vec<LinkEffect>,
    ) {
        if !matches!(
            self.state,
            LinkState::Connected | LinkState::TimerRecovery
        ) {
            self.send_u(UType::Dm, CmdRes::Response, pf, &[], fx);
            return;
        }

        // Piggy-backed acknowledgement.
        if self.nr_valid(nr) {
            self.ack_to(nr, now);
            if self.va == self.vs {
                self.stop_t1();
                self.start_t3(now);
            }
        }

        let pid = frame.pid(self.modulo).unwrap_or(crate::frame::PID_NO_LAYER3);
        let info = frame.info(self.modulo);

        if ns == self.vr {
            self.vr = self.seq_add(self.vr, 1);
            self.rej_sent = false;
            fx.push(LinkEffect::Upcall(LinkNotice::Data {
                key: self.key,
                pid,
                data: info.to_vec(),
            }));
            // Drain any buffered in-order successors.
            while let Some((pid, data)) = self.reseq.remove(&self.vr) {
                self.vr = self.seq_add(self.vr, 1);
                fx.push(LinkEffect::Upcall(LinkNotice::Data {
                    key: self.key,
                    pid,
                    data,
                }));
            }
            self.ack_pending += 1;
            if pf {
                self.enquiry_response(fx);
            } else {
                self.schedule_ack(now);
            }
            self.push_iframes(now, fx);
        } else {
            // Out of order.
            let in_window = self.seq_sub(ns, self.vr) < self.k;
            if self.srej_enabled && in_window {
                self.reseq.insert(ns, (pid, info.to_vec()));
                let frame = Frame::new_s(
                    self.key.remote,
                    self.key.local,
                    SType::Srej,
                    self.modulo,
                    self.vr,
                    false,
                    CmdRes::Response,
                );
                self.transmit(frame, TxPriority::High, fx);
            } else if !self.rej_sent {
                self.rej_sent = true;
                let frame = Frame::new_s(
                    self.key.remote,
                    self.key.local,
                    SType::Rej,
                    self.modulo,
                    self.vr,
                    pf,
                    CmdRes::Response,
                );
                self.transmit(frame, TxPriority::High, fx);
            } else if pf {
                self.enquiry_response(fx);
            }
        }
    }

    fn apply_xid(&mut self, theirs: &XidParams) {
        if let Some(their_n1) = theirs.n1_bytes {
            self.n1 = self.n1.min(their_n1).max(1);
        }
        if let Some(their_k) = theirs.window {
            self.k = self.k.min(their_k).max(1);
        }
        if let Some(srej) = theirs.srej {
            self.srej_enabled = srej && self.modulo == Modulo::OneTwentyEight;
        }
    }

    // -- timers -------------------------------------------------------------

    pub fn timer_tick(&mut self, now: Instant, fx: &mut Vec<LinkEffect>) {
        if let Some(t2) = self.t2 {
            if now >= t2 {
                self.t2 = None;
                if self.ack_pending > 0
                    && matches!(
                        self.state,
                        LinkState::Connected | LinkState::TimerRecovery
                    )
                {
                    self.send_s(SType::Rr, CmdRes::Response, false, fx);
                }
            }
        }

        if let Some(t1) = self.t1 {
            if now >= t1 {
                self.t1 = None;
                self.t1_expired(now, fx);
            }
        }

        if let Some(t3) = self.t3 {
            if now >= t3 && self.state == LinkState::Connected {
                self.t3 = None;
                // Idle link check.
                self.state = LinkState::TimerRecovery;
                self.rc = 1;
                self.send_s(SType::Rr, CmdRes::Command, true, fx);
                self.start_t1(now);
            }
        }
    }

    fn t1_expired(&mut self, now: Instant, fx: &mut Vec<LinkEffect>) {
        self.rc += 1;
        self.t1v = (self.t1v * 2).min(T1V_MAX);

        if self.rc > self.cfg.n2 {
            let reason = match self.state {
                LinkState::AwaitingConnect | LinkState::AwaitingConnect22 => {
                    LinkError::ConnectTimedOut {
                        remote: self.key.remote.to_string(),
                        tries: self.rc - 1,
                    }
                }
                _ => LinkError::RetryExhausted {
                    remote: self.key.remote.to_string(),
                },
            };
            self.enter_disconnected(now, reason, fx);
            return;
        }

        match self.state {
            LinkState::AwaitingConnect => {
                self.send_u(UType::Sabm, CmdRes::Command, true, &[], fx);
                self.start_t1(now);
            }
            LinkState::AwaitingConnect22 => {
                if self.sabme_tries >= self.cfg.maxv22 {
                    // v2.2 peer not answering: fall back to v2.0.
                    self.state = LinkState::AwaitingConnect;
                    self.modulo = Modulo::Eight;
                    self.send_u(UType::Sabm, CmdRes::Command, true, &[], fx);
                } else {
                    self.sabme_tries += 1;
                    self.send_u(UType::Sabme, CmdRes::Command, true, &[], fx);
                }
                self.start_t1(now);
            }
            LinkState::Connected | LinkState::TimerRecovery => {
                self.state = LinkState::TimerRecovery;
                let kind = if self.own_busy { SType::Rnr } else { SType::Rr };
                self.send_s(kind, CmdRes::Command, true, fx);
                self.start_t1(now);
            }
            LinkState::AwaitingRelease => {
                self.send_u(UType::Disc, CmdRes::Command, true, &[], fx);
                self.start_t1(now);
            }
            LinkState::Disconnected => {}
        }
    }
}

// ---------------------------------------------------------------------------
// XID parameter field
// ---------------------------------------------------------------------------

const XID_FI: u8 = 0x82;
const XID_GI: u8 = 0x80;

const PI_OPTIONAL_FUNCTIONS: u8 = 3;
const PI_RX_I_FIELD_LEN: u8 = 6;
const PI_RX_WINDOW: u8 = 8;

/// SREJ support bit in the first optional-functions byte.
const OF_SREJ: u8 = 0x20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XidParams {
    /// Peer's receive I-field capacity, bytes.
    pub n1_bytes: Option<usize>,
    /// Peer's receive window.
    pub window: Option<u8>,
    pub srej: Option<bool>,
}

/// Serialize our negotiation offer.
pub fn xid_encode(n1_bytes: usize, window: u8, srej: bool) -> Vec<u8> {
    let mut params = Vec::new();

    params.push(PI_OPTIONAL_FUNCTIONS);
    params.push(3);
    params.push(if srej { OF_SREJ } else { 0 });
    params.push(0);
    params.push(0);

    let bits = (n1_bytes * 8).min(u16::MAX as usize) as u16;
    params.push(PI_RX_I_FIELD_LEN);
    params.push(2);
    params.extend_from_slice(&bits.to_be_bytes());

    params.push(PI_RX_WINDOW);
    params.push(1);
    params.push(window);

    let mut out = Vec::with_capacity(4 + params.len());
    out.push(XID_FI);
    out.push(XID_GI);
    out.extend_from_slice(&(params.len() as u16).to_be_bytes());
    out.extend_from_slice(&params);
    out
}

/// Parse a peer's parameter field, ignoring unknown parameters.
pub fn xid_decode(info: &[u8]) -> Option<XidParams> {
    if info.len() < 4 || info[0] != XID_FI || info[1] != XID_GI {
        return None;
    }
    let group_len = u16::from_be_bytes([info[2], info[3]]) as usize;
    let params = info.get(4..4 + group_len)?;

    let mut result = XidParams::default();
    let mut i = 0;
    while i + 2 <= params.len() {
        let pi = params[i];
        let pl = params[i + 1] as usize;
        let value = params.get(i + 2..i + 2 + pl)?;
        match pi {
            PI_OPTIONAL_FUNCTIONS => {
                result.srej = value.first().map(|&b| b & OF_SREJ != 0);
            }
            PI_RX_I_FIELD_LEN => {
                if pl == 2 {
                    let bits = u16::from_be_bytes([value[0], value[1]]) as usize;
                    result.n1_bytes = Some((bits / 8).max(1));
                }
            }
            PI_RX_WINDOW => {
                result.window = value.first().copied();
            }
            _ => {}
        }
        i += 2 + pl;
    }
    Some(result)
}
