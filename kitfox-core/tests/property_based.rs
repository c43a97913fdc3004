use proptest::prelude::*;

use kitfox_core::config::{LinkConfig, SanityCheck};
use kitfox_core::fcs;
use kitfox_core::frame::{CallSign, Frame, Modulo, PID_NO_LAYER3};
use kitfox_core::hdlc::deframe::HdlcDeframer;
use kitfox_core::hdlc::stuff::HdlcEncoder;
use kitfox_core::link::machine::LinkSession;
use kitfox_core::link::{LinkEffect, SessionKey};
use std::time::Instant;

fn call(s: &str) -> CallSign {
    s.parse().unwrap()
}

proptest! {
    /// Any information payload survives serialize + deframe, bit-exact.
    #[test]
    fn hdlc_roundtrip_any_payload(info in prop::collection::vec(any::<u8>(), 0..600)) {
        let frame = Frame::new_ui(call("APRS"), call("N0CALL"), &[], PID_NO_LAYER3, &info)
            .unwrap();

        let mut enc = HdlcEncoder::new();
        enc.push_flags(4);
        enc.push_body(frame.as_bytes());
        enc.push_flags(2);

        let mut deframer = HdlcDeframer::new(true, 0, SanityCheck::None);
        let mut level = false;
        let mut decoded = Vec::new();
        for &b in enc.bits() {
            if b == 0 {
                level = !level;
            }
            if let Some(f) = deframer.rec_bit(level) {
                decoded.push(f.body);
            }
        }
        prop_assert_eq!(decoded.len(), 1);
        prop_assert_eq!(&decoded[0], frame.as_bytes());
    }

    /// The stuffer never emits six consecutive ones inside a frame body.
    #[test]
    fn stuffing_bounds_one_runs(info in prop::collection::vec(any::<u8>(), 0..600)) {
        let frame = Frame::new_ui(call("APRS"), call("N0CALL"), &[], PID_NO_LAYER3, &info)
            .unwrap();
        let mut enc = HdlcEncoder::new();
        enc.push_body(frame.as_bytes());

        let mut run = 0u32;
        for &b in enc.bits() {
            if b == 1 {
                run += 1;
                prop_assert!(run < 6);
            } else {
                run = 0;
            }
        }
    }

    /// The FCS detects any single corrupted byte.
    #[test]
    fn fcs_detects_single_byte_errors(
        body in prop::collection::vec(any::<u8>(), 15..100),
        pos in any::<prop::sample::Index>(),
        xor in 1u8..,
    ) {
        let mut with_fcs = body.clone();
        fcs::fcs_append(&mut with_fcs);
        prop_assert!(fcs::fcs_check(&with_fcs));

        let i = pos.index(with_fcs.len());
        with_fcs[i] ^= xor;
        prop_assert!(!fcs::fcs_check(&with_fcs));
    }

    /// Sequence variables stay inside [0, modulo) and the window
    /// constraint |V(s) - V(a)| <= k holds while pumping data.
    #[test]
    fn window_invariants_hold(chunks in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 1..64), 1..24))
    {
        let key = SessionKey {
            chan: 0,
            local: call("N0CALL"),
            remote: call("W1AW"),
        };
        let cfg = LinkConfig::default();
        let k = cfg.maxframe;
        let mut session = LinkSession::new(key, cfg);
        let now = Instant::now();
        let mut fx = Vec::new();

        // Bring the session up as the answering side (v2.0).
        let sabm = Frame::new_u(
            call("N0CALL"),
            call("W1AW"),
            kitfox_core::frame::UType::Sabm,
            kitfox_core::frame::CmdRes::Command,
            true,
            &[],
        );
        session.frame_received(&sabm, now, &mut fx);

        let modulo = session.modulo().value() as u16;
        for data in &chunks {
            fx.clear();
            session.data_request(PID_NO_LAYER3, data, now, &mut fx);
            let (vs, vr, va) = session.sequence_vars();
            prop_assert!((vs as u16) < modulo);
            prop_assert!((vr as u16) < modulo);
            prop_assert!((va as u16) < modulo);
            let outstanding = (vs as i16 - va as i16).rem_euclid(modulo as i16);
            prop_assert!(outstanding as u16 <= k as u16);
            // Frames only go out while the window is open.
            let sent = fx
                .iter()
                .filter(|e| matches!(e, LinkEffect::Transmit { .. }))
                .count();
            prop_assert!(sent <= k as usize);
        }
    }
}
