//! Bit-flip retry for frames that fail the FCS.
//!
//! Depth 1 tries every single-bit flip over the raw inter-flag bits; depth
//! 2 additionally tries adjacent bit pairs (a common impulse-noise
//! signature). A recovered frame must still pass the configured sanity
//! filter, since a 16-bit FCS gives weak protection once we start
//! searching for agreement.

use crate::config::SanityCheck;
use crate::frame::{Frame, FrameCategory};
use crate::hdlc::unstuff_and_check;

/// Cap on the raw length we are willing to search; long frames make the
/// single-flip search expensive and recovery unlikely.
const MAX_FIX_BITS: usize = 3600;

/// Try to recover a frame from `bits` by flipping up to `depth` bits.
/// Returns the body, its FCS and the number of bits flipped.
pub fn attempt_fix(
    bits: &[u8],
    depth: u8,
    sanity: SanityCheck,
) -> Option<(Vec<u8>, u16, u8)> {
    if bits.len() > MAX_FIX_BITS {
        return None;
    }

    let mut work = bits.to_vec();

    // Single flips.
    for i in 0..work.len() {
        work[i] ^= 1;
        if let Some((body, crc)) = check_candidate(&work, sanity) {
            return Some((body, crc, 1));
        }
        work[i] ^= 1;
    }

    if depth >= 2 {
        // Adjacent pairs.
        for i in 0..work.len().saturating_sub(1) {
            work[i] ^= 1;
            work[i + 1] ^= 1;
            if let Some((body, crc)) = check_candidate(&work, sanity) {
                return Some((body, crc, 2));
            }
            work[i] ^= 1;
            work[i + 1] ^= 1;
        }
    }

    None
}

fn check_candidate(bits: &[u8], sanity: SanityCheck) -> Option<(Vec<u8>, u16)> {
    let (body, crc) = unstuff_and_check(bits)?;
    if !passes_sanity(&body, sanity) {
        return None;
    }
    Some((body, crc))
}

fn passes_sanity(body: &[u8], sanity: SanityCheck) -> bool {
    match sanity {
        SanityCheck::None => true,
        SanityCheck::Ax25 => match Frame::parse(body) {
            Ok(frame) => frame.addresses_sane(),
            Err(_) => false,
        },
        SanityCheck::Aprs => match Frame::parse(body) {
            // APRS traffic is UI frames with sane addresses.
            Ok(frame) => {
                frame.addresses_sane() && frame.category() == FrameCategory::Unnumbered
            }
            Err(_) => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CallSign, Frame, PID_NO_LAYER3};
    use crate::hdlc::stuff::HdlcEncoder;

    fn stuffed_bits(frame: &Frame) -> Vec<u8> {
        let mut enc = HdlcEncoder::new();
        enc.push_body(frame.as_bytes());
        enc.into_bits()
    }

    fn sample_frame() -> Frame {
        let dest: CallSign = "APRS".parse().unwrap();
        let src: CallSign = "W1AW-3".parse().unwrap();
        Frame::new_ui(dest, src, &[], PID_NO_LAYER3, b"fix me").unwrap()
    }

    #[test]
    fn recovers_single_flip() {
        let frame = sample_frame();
        let mut bits = stuffed_bits(&frame);
        bits[57] ^= 1;
        let (body, _, retries) = attempt_fix(&bits, 1, SanityCheck::Ax25).unwrap();
        assert_eq!(body, frame.as_bytes());
        assert_eq!(retries, 1);
    }

    #[test]
    fn recovers_adjacent_pair_at_depth_two() {
        let frame = sample_frame();
        let mut bits = stuffed_bits(&frame);
        bits[80] ^= 1;
        bits[81] ^= 1;
        assert!(attempt_fix(&bits, 1, SanityCheck::Ax25).is_none());
        let (body, _, retries) = attempt_fix(&bits, 2, SanityCheck::Ax25).unwrap();
        assert_eq!(body, frame.as_bytes());
        assert_eq!(retries, 2);
    }

    #[test]
    fn clean_buffer_yields_no_false_fix() {
        // A zero-error buffer cannot be "fixed" into something else that
        // both checks and parses; every single flip breaks the FCS.
        let frame = sample_frame();
        let bits = stuffed_bits(&frame);
        assert!(attempt_fix(&bits, 1, SanityCheck::Ax25).is_none());
    }
}
