//! Connected-mode state machine scenarios, driven frame by frame with a
//! controlled clock.

use std::time::{Duration, Instant};

use kitfox_core::config::LinkConfig;
use kitfox_core::errors::LinkError;
use kitfox_core::frame::{CallSign, CmdRes, Frame, FrameType, Modulo, SType, UType, PID_NO_LAYER3};
use kitfox_core::link::machine::LinkSession;
use kitfox_core::link::{LinkEffect, LinkNotice, SessionKey};
use kitfox_core::link::machine::LinkState;

fn local() -> CallSign {
    "N0CALL".parse().unwrap()
}

fn remote() -> CallSign {
    "W1AW".parse().unwrap()
}

fn key() -> SessionKey {
    SessionKey {
        chan: 0,
        local: local(),
        remote: remote(),
    }
}

/// Transmitted frames among the effects, decoded with the session's
/// modulo.
fn sent_frames(effects: &[LinkEffect]) -> Vec<Frame> {
    effects
        .iter()
        .filter_map(|e| match e {
            LinkEffect::Transmit { frame, .. } => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

fn sent_types(effects: &[LinkEffect], modulo: Modulo) -> Vec<FrameType> {
    sent_frames(effects)
        .iter()
        .map(|f| f.frame_type(modulo).unwrap())
        .collect()
}

fn upcalls(effects: &[LinkEffect]) -> Vec<LinkNotice> {
    effects
        .iter()
        .filter_map(|e| match e {
            LinkEffect::Upcall(n) => Some(n.clone()),
            _ => None,
        })
        .collect()
}

/// Answering side: bring a v2.0 session up by receiving SABM.
fn accept_sabm(session: &mut LinkSession, now: Instant) {
    let sabm = Frame::new_u(local(), remote(), UType::Sabm, CmdRes::Command, true, &[]);
    let mut fx = Vec::new();
    session.frame_received(&sabm, now, &mut fx);
    assert_eq!(session.state(), LinkState::Connected);
}

#[test]
fn sabm_answered_with_ua_and_zeroed_state() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    let sabm = Frame::new_u(local(), remote(), UType::Sabm, CmdRes::Command, true, &[]);
    let mut fx = Vec::new();
    session.frame_received(&sabm, now, &mut fx);

    assert_eq!(session.state(), LinkState::Connected);
    assert_eq!(session.modulo(), Modulo::Eight);
    assert_eq!(session.sequence_vars(), (0, 0, 0));

    let types = sent_types(&fx, Modulo::Eight);
    assert_eq!(
        types,
        vec![FrameType::U {
            kind: UType::Ua,
            pf: true
        }],
        "UA response with the poll bit echoed as final"
    );
    assert!(upcalls(&fx)
        .iter()
        .any(|n| matches!(n, LinkNotice::LinkUp { .. })));
}

#[test]
fn window_of_four_holds_fifth_frame() {
    let config = LinkConfig {
        maxframe: 4,
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(key(), config);
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let mut fx = Vec::new();
    for i in 0..5u8 {
        session.data_request(PID_NO_LAYER3, &[b'a' + i], now, &mut fx);
    }
    let i_frames: Vec<_> = sent_types(&fx, Modulo::Eight)
        .into_iter()
        .filter(|t| matches!(t, FrameType::I { .. }))
        .collect();
    assert_eq!(i_frames.len(), 4, "window k=4 limits the burst");
    assert_eq!(session.sequence_vars().0, 4, "V(s) stopped at the window");

    // RR acknowledging the first frame reopens the window.
    let rr = Frame::new_s(
        local(),
        remote(),
        SType::Rr,
        Modulo::Eight,
        1,
        false,
        CmdRes::Response,
    );
    let mut fx = Vec::new();
    session.frame_received(&rr, now, &mut fx);

    let (vs, _, va) = session.sequence_vars();
    assert_eq!(va, 1);
    assert_eq!(vs, 5, "fifth frame released");
    let released: Vec<_> = sent_types(&fx, Modulo::Eight)
        .into_iter()
        .filter_map(|t| match t {
            FrameType::I { ns, .. } => Some(ns),
            _ => None,
        })
        .collect();
    assert_eq!(released, vec![4]);
}

#[test]
fn rej_triggers_in_order_retransmission() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let mut fx = Vec::new();
    for i in 0..5u8 {
        session.data_request(PID_NO_LAYER3, &[i], now, &mut fx);
    }
    assert_eq!(session.sequence_vars().0, 5);

    let rej = Frame::new_s(
        local(),
        remote(),
        SType::Rej,
        Modulo::Eight,
        2,
        false,
        CmdRes::Response,
    );
    let mut fx = Vec::new();
    session.frame_received(&rej, now, &mut fx);

    let resent: Vec<_> = sent_types(&fx, Modulo::Eight)
        .into_iter()
        .filter_map(|t| match t {
            FrameType::I { ns, .. } => Some(ns),
            _ => None,
        })
        .collect();
    assert_eq!(resent, vec![2, 3, 4], "retransmission starts at N(R), in order");
    assert_eq!(session.sequence_vars().2, 2, "V(a) advanced to N(R)");
}

#[test]
fn in_sequence_i_frame_delivers_and_acks() {
    let config = LinkConfig {
        t2_ms: 50,
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(key(), config);
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let i = Frame::new_i(
        local(),
        remote(),
        Modulo::Eight,
        0,
        0,
        false,
        PID_NO_LAYER3,
        b"payload",
    )
    .unwrap();
    let mut fx = Vec::new();
    session.frame_received(&i, now, &mut fx);

    assert_eq!(session.sequence_vars().1, 1, "V(r) advanced");
    assert!(upcalls(&fx).iter().any(
        |n| matches!(n, LinkNotice::Data { data, .. } if data == b"payload")
    ));
    // Acknowledgement is delayed for piggy-backing (T2), then sent.
    assert!(sent_frames(&fx).is_empty());
    let mut fx = Vec::new();
    session.timer_tick(now + Duration::from_millis(80), &mut fx);
    let types = sent_types(&fx, Modulo::Eight);
    assert_eq!(
        types,
        vec![FrameType::S {
            kind: SType::Rr,
            nr: 1,
            pf: false
        }]
    );
}

#[test]
fn i_frame_with_poll_is_acked_immediately() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let i = Frame::new_i(
        local(),
        remote(),
        Modulo::Eight,
        0,
        0,
        true,
        PID_NO_LAYER3,
        b"x",
    )
    .unwrap();
    let mut fx = Vec::new();
    session.frame_received(&i, now, &mut fx);
    let types = sent_types(&fx, Modulo::Eight);
    assert_eq!(
        types,
        vec![FrameType::S {
            kind: SType::Rr,
            nr: 1,
            pf: true
        }]
    );
}

#[test]
fn out_of_sequence_draws_a_single_rej() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    accept_sabm(&mut session, now);

    for ns in [2u8, 3] {
        let i = Frame::new_i(
            local(),
            remote(),
            Modulo::Eight,
            0,
            ns,
            false,
            PID_NO_LAYER3,
            b"gap",
        )
        .unwrap();
        let mut fx = Vec::new();
        session.frame_received(&i, now, &mut fx);
        let rejs = sent_types(&fx, Modulo::Eight)
            .into_iter()
            .filter(|t| matches!(t, FrameType::S { kind: SType::Rej, nr: 0, .. }))
            .count();
        if ns == 2 {
            assert_eq!(rejs, 1, "first gap draws REJ(0)");
        } else {
            assert_eq!(rejs, 0, "REJ not repeated while outstanding");
        }
    }
    assert_eq!(session.sequence_vars().1, 0, "V(r) unchanged by the gap");
}

#[test]
fn connect_times_out_after_n2_tries() {
    let config = LinkConfig {
        n2: 3,
        maxv22: 2,
        t1v_ms: 1000,
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(key(), config);
    let mut now = Instant::now();
    let mut fx = Vec::new();
    session.connect_request(now, &mut fx);
    assert_eq!(session.state(), LinkState::AwaitingConnect22);
    assert_eq!(
        sent_types(&fx, Modulo::Eight),
        vec![FrameType::U {
            kind: UType::Sabme,
            pf: true
        }]
    );

    let mut all_sent = Vec::new();
    let mut down = None;
    for _ in 0..10 {
        now += Duration::from_secs(60);
        let mut fx = Vec::new();
        session.timer_tick(now, &mut fx);
        all_sent.extend(sent_types(&fx, Modulo::Eight));
        if let Some(notice) = upcalls(&fx).into_iter().find(
            |n| matches!(n, LinkNotice::LinkDown { .. })
        ) {
            down = Some(notice);
            break;
        }
    }

    let down = down.expect("link must give up");
    assert!(matches!(
        down,
        LinkNotice::LinkDown {
            reason: LinkError::ConnectTimedOut { .. },
            ..
        }
    ));
    // After MAXV22 unanswered SABMEs the retries switch to SABM.
    assert!(all_sent.contains(&FrameType::U {
        kind: UType::Sabme,
        pf: true
    }));
    assert!(all_sent.contains(&FrameType::U {
        kind: UType::Sabm,
        pf: true
    }));
    assert_eq!(session.state(), LinkState::Disconnected);
}

#[test]
fn dm_to_sabme_falls_back_to_v20() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    let mut fx = Vec::new();
    session.connect_request(now, &mut fx);
    assert_eq!(session.state(), LinkState::AwaitingConnect22);

    let dm = Frame::new_u(local(), remote(), UType::Dm, CmdRes::Response, true, &[]);
    let mut fx = Vec::new();
    session.frame_received(&dm, now, &mut fx);
    assert_eq!(session.state(), LinkState::AwaitingConnect);
    assert_eq!(session.modulo(), Modulo::Eight);
    assert_eq!(
        sent_types(&fx, Modulo::Eight),
        vec![FrameType::U {
            kind: UType::Sabm,
            pf: true
        }]
    );
}

#[test]
fn v20_peer_gets_sabm_directly() {
    let config = LinkConfig {
        v20_peers: vec!["W1AW".to_string()],
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(key(), config);
    let mut fx = Vec::new();
    session.connect_request(Instant::now(), &mut fx);
    assert_eq!(session.state(), LinkState::AwaitingConnect);
    assert_eq!(
        sent_types(&fx, Modulo::Eight),
        vec![FrameType::U {
            kind: UType::Sabm,
            pf: true
        }]
    );
}

#[test]
fn sabme_ua_negotiates_xid() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    let mut fx = Vec::new();
    session.connect_request(now, &mut fx);

    let ua = Frame::new_u(local(), remote(), UType::Ua, CmdRes::Response, true, &[]);
    let mut fx = Vec::new();
    session.frame_received(&ua, now, &mut fx);
    assert_eq!(session.state(), LinkState::Connected);
    assert_eq!(session.modulo(), Modulo::OneTwentyEight);

    // An XID command goes out to negotiate parameters.
    let xid_sent = sent_frames(&fx).into_iter().find(|f| {
        matches!(
            f.frame_type(Modulo::OneTwentyEight),
            Ok(FrameType::U {
                kind: UType::Xid,
                ..
            })
        )
    });
    let xid_sent = xid_sent.expect("XID command after v2.2 connect");
    assert!(!xid_sent.info(Modulo::OneTwentyEight).is_empty());

    // The peer offers a smaller window and I-field; we take the minimum.
    let reply_info = kitfox_core::link::machine::xid_encode(128, 8, false);
    let xid_reply = Frame::new_u(
        local(),
        remote(),
        UType::Xid,
        CmdRes::Response,
        true,
        &reply_info,
    );
    let mut fx = Vec::new();
    session.frame_received(&xid_reply, now, &mut fx);
    assert_eq!(session.max_info_len(), 128);
    assert_eq!(session.window(), 8);
    assert!(upcalls(&fx)
        .iter()
        .any(|n| matches!(n, LinkNotice::XidResult { n1: 128, k: 8, .. })));
}

#[test]
fn no_xid_peer_skips_negotiation() {
    let config = LinkConfig {
        no_xid_peers: vec!["W1AW".to_string()],
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(key(), config);
    let now = Instant::now();
    let mut fx = Vec::new();
    session.connect_request(now, &mut fx);
    let ua = Frame::new_u(local(), remote(), UType::Ua, CmdRes::Response, true, &[]);
    let mut fx = Vec::new();
    session.frame_received(&ua, now, &mut fx);
    assert!(sent_frames(&fx).is_empty(), "no XID for a no-XID peer");
}

#[test]
fn disc_ua_exchange_tears_down() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let mut fx = Vec::new();
    session.disconnect_request(now, &mut fx);
    assert_eq!(session.state(), LinkState::AwaitingRelease);
    assert_eq!(
        sent_types(&fx, Modulo::Eight),
        vec![FrameType::U {
            kind: UType::Disc,
            pf: true
        }]
    );

    let ua = Frame::new_u(local(), remote(), UType::Ua, CmdRes::Response, true, &[]);
    let mut fx = Vec::new();
    session.frame_received(&ua, now, &mut fx);
    assert_eq!(session.state(), LinkState::Disconnected);
    assert!(upcalls(&fx).iter().any(|n| matches!(
        n,
        LinkNotice::LinkDown {
            reason: LinkError::Disconnected { .. },
            ..
        }
    )));
}

#[test]
fn t1_expiry_enters_timer_recovery_and_polls() {
    let config = LinkConfig {
        t1v_ms: 500,
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(key(), config);
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let mut fx = Vec::new();
    session.data_request(PID_NO_LAYER3, b"unacked", now, &mut fx);

    let mut fx = Vec::new();
    session.timer_tick(now + Duration::from_secs(2), &mut fx);
    assert_eq!(session.state(), LinkState::TimerRecovery);
    let types = sent_types(&fx, Modulo::Eight);
    assert_eq!(
        types,
        vec![FrameType::S {
            kind: SType::Rr,
            nr: 0,
            pf: true
        }],
        "poll with P=1 on T1 expiry"
    );

    // Poll answer with everything acknowledged resumes normal operation.
    let rr = Frame::new_s(
        local(),
        remote(),
        SType::Rr,
        Modulo::Eight,
        1,
        true,
        CmdRes::Response,
    );
    let mut fx = Vec::new();
    session.frame_received(&rr, now + Duration::from_secs(2), &mut fx);
    assert_eq!(session.state(), LinkState::Connected);
    assert_eq!(session.sequence_vars().2, 1);
}

#[test]
fn srej_response_retransmits_one_frame() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let mut fx = Vec::new();
    for i in 0..4u8 {
        session.data_request(PID_NO_LAYER3, &[i], now, &mut fx);
    }

    let srej = Frame::new_s(
        local(),
        remote(),
        SType::Srej,
        Modulo::Eight,
        1,
        false,
        CmdRes::Response,
    );
    let mut fx = Vec::new();
    session.frame_received(&srej, now, &mut fx);
    let resent: Vec<_> = sent_types(&fx, Modulo::Eight)
        .into_iter()
        .filter_map(|t| match t {
            FrameType::I { ns, .. } => Some(ns),
            _ => None,
        })
        .collect();
    assert_eq!(resent, vec![1], "SREJ retransmits exactly one frame");
}

#[test]
fn srej_command_tolerated_with_warning() {
    let mut session = LinkSession::new(key(), LinkConfig::default());
    let now = Instant::now();
    accept_sabm(&mut session, now);
    let mut fx = Vec::new();
    session.data_request(PID_NO_LAYER3, b"a", now, &mut fx);

    let srej = Frame::new_s(
        local(),
        remote(),
        SType::Srej,
        Modulo::Eight,
        0,
        false,
        CmdRes::Command,
    );
    let mut fx = Vec::new();
    session.frame_received(&srej, now, &mut fx);
    assert!(upcalls(&fx)
        .iter()
        .any(|n| matches!(n, LinkNotice::ProtocolWarning { .. })));
}

#[test]
fn t3_keepalive_polls_idle_link() {
    let config = LinkConfig {
        t3_ms: 1_000,
        ..LinkConfig::default()
    };
    let mut session = LinkSession::new(key(), config);
    let now = Instant::now();
    accept_sabm(&mut session, now);

    let mut fx = Vec::new();
    session.timer_tick(now + Duration::from_secs(5), &mut fx);
    let types = sent_types(&fx, Modulo::Eight);
    assert_eq!(
        types,
        vec![FrameType::S {
            kind: SType::Rr,
            nr: 0,
            pf: true
        }],
        "T3 sends an RR poll to verify the peer is alive"
    );
    assert_eq!(session.state(), LinkState::TimerRecovery);
}
