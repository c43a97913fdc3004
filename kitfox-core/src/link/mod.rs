//! Connected-mode AX.25 data link (v2.0 and v2.2).
//!
//! One [`machine::LinkSession`] per {channel, local, remote} triple,
//! held in a [`SessionTable`] behind one mutex. State transitions run
//! entirely under the lock and produce [`LinkEffect`]s; the dispatcher
//! and timer threads execute the effects (queueing frames, signaling
//! clients) after the lock is released.

pub mod machine;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::LinkConfig;
use crate::errors::LinkError;
use crate::frame::{CallSign, CmdRes, Frame, FrameCategory, FrameType, Modulo, UType};
use crate::txq::TxPriority;

use machine::{LinkSession, LinkState};

/// Identity of a link session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chan: usize,
    pub local: CallSign,
    pub remote: CallSign,
}

/// External effects decided by the state machine, executed outside the
/// session lock.
#[derive(Debug, Clone)]
pub enum LinkEffect {
    Transmit {
        chan: usize,
        prio: TxPriority,
        frame: Frame,
    },
    Upcall(LinkNotice),
}

/// Upcalls to the client interface.
#[derive(Debug, Clone)]
pub enum LinkNotice {
    LinkUp {
        key: SessionKey,
    },
    LinkDown {
        key: SessionKey,
        reason: LinkError,
    },
    /// In-order connected data for the client.
    Data {
        key: SessionKey,
        pid: u8,
        data: Vec<u8>,
    },
    /// Result of an XID negotiation.
    XidResult {
        key: SessionKey,
        n1: usize,
        k: u8,
    },
    /// Peer did something tolerated but nonstandard.
    ProtocolWarning {
        key: SessionKey,
        message: String,
    },
}

pub struct SessionTable {
    config: LinkConfig,
    sessions: Mutex<HashMap<SessionKey, LinkSession>>,
}

impl SessionTable {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("sessions poisoned").len()
    }

    /// Peek at a session's state, for diagnostics and tests.
    pub fn state_of(&self, key: &SessionKey) -> Option<LinkState> {
        self.sessions
            .lock()
            .expect("sessions poisoned")
            .get(key)
            .map(|s| s.state())
    }

    /// Client asks to establish a connection.
    pub fn connect(&self, key: SessionKey, now: Instant) -> Vec<LinkEffect> {
        let mut sessions = self.sessions.lock().expect("sessions poisoned");
        let session = sessions
            .entry(key)
            .or_insert_with(|| LinkSession::new(key, self.config.clone()));
        let mut effects = Vec::new();
        session.connect_request(now, &mut effects);
        effects
    }

    /// Client asks to tear a connection down.
    pub fn disconnect(&self, key: SessionKey, now: Instant) -> Vec<LinkEffect> {
        let mut sessions = self.sessions.lock().expect("sessions poisoned");
        let mut effects = Vec::new();
        if let Some(session) = sessions.get_mut(&key) {
            session.disconnect_request(now, &mut effects);
        }
        effects
    }

    /// Client hands over data for the connected peer.
    pub fn send_data(&self, key: SessionKey, pid: u8, data: &[u8], now: Instant) -> Vec<LinkEffect> {
        let mut sessions = self.sessions.lock().expect("sessions poisoned");
        let mut effects = Vec::new();
        if let Some(session) = sessions.get_mut(&key) {
            session.data_request(pid, data, now, &mut effects);
        } else {
            effects.push(LinkEffect::Upcall(LinkNotice::LinkDown {
                key,
                reason: LinkError::Disconnected {
                    remote: key.remote.to_string(),
                },
            }));
        }
        effects
    }

    /// Client asks for an explicit XID exchange.
    pub fn xid_query(&self, key: SessionKey, now: Instant) -> Vec<LinkEffect> {
        let mut sessions = self.sessions.lock().expect("sessions poisoned");
        let mut effects = Vec::new();
        if let Some(session) = sessions.get_mut(&key) {
            session.xid_request(now, &mut effects);
        }
        effects
    }

    /// A frame addressed to a registered callsign arrived on `chan`.
    pub fn frame_received(
        &self,
        chan: usize,
        local: CallSign,
        frame: &Frame,
        now: Instant,
    ) -> Vec<LinkEffect> {
        let key = SessionKey {
            chan,
            local,
            remote: frame.src(),
        };
        let mut sessions = self.sessions.lock().expect("sessions poisoned");
        let mut effects = Vec::new();

        if let Some(session) = sessions.get_mut(&key) {
            session.frame_received(frame, now, &mut effects);
            return effects;
        }

        // No session: SABM(E) creates one lazily; any other command is
        // answered with DM so the peer gives up quickly.
        let is_setup = matches!(
            frame.frame_type(Modulo::Eight),
            Ok(FrameType::U {
                kind: UType::Sabm | UType::Sabme,
                ..
            })
        );
        if is_setup {
            let session = sessions
                .entry(key)
                .or_insert_with(|| LinkSession::new(key, self.config.clone()));
            session.frame_received(frame, now, &mut effects);
        } else if frame.cmd_res() == CmdRes::Command
            && frame.category() != FrameCategory::Unnumbered
        {
            let pf = match frame.frame_type(Modulo::Eight) {
                Ok(FrameType::S { pf, .. }) | Ok(FrameType::I { pf, .. }) => pf,
                _ => false,
            };
            effects.push(LinkEffect::Transmit {
                chan,
                prio: TxPriority::High,
                frame: Frame::new_u(key.remote, key.local, UType::Dm, CmdRes::Response, pf, &[]),
            });
        }
        effects
    }

    /// Periodic timer sweep; also reaps sessions past their hold-down.
    pub fn tick(&self, now: Instant) -> Vec<LinkEffect> {
        let mut sessions = self.sessions.lock().expect("sessions poisoned");
        let mut effects = Vec::new();
        for session in sessions.values_mut() {
            session.timer_tick(now, &mut effects);
        }
        sessions.retain(|_, s| !s.reapable(now));
        effects
    }
}
