//! Receive-side HDLC deframer, one instance per bit slicer.
//!
//! The deframer watches the post-NRZI bit stream for flags and aborts with
//! an 8-bit pattern register while collecting the raw bits between flags.
//! At a closing flag the collected run is unstuffed and FCS-checked in one
//! pass; if that fails and the channel has fix-bits enabled, the raw run is
//! handed to the fixer for bounded bit-flip retries.

use crate::config::SanityCheck;
use crate::hdlc::{fixer, unstuff_and_check, MAX_BODY_WITH_FCS, MIN_BODY_WITH_FCS};

/// Upper bound on stored inter-flag bits: worst-case stuffing expands the
/// body by one bit in five, plus slack for the closing flag.
const MAX_RAW_BITS: usize = MAX_BODY_WITH_FCS * 8 * 6 / 5 + 16;

const FLAG_PATTERN: u8 = 0x7E;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeframerState {
    /// Searching for the first flag.
    Hunt,
    /// Between flags, collecting frame bits.
    Sync,
    /// Seven or more consecutive ones seen; waiting for a flag.
    AbortWait,
}

/// A frame body that survived the FCS (directly or after fixing).
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Frame body without the FCS.
    pub body: Vec<u8>,
    /// Received FCS value, used for cross-slicer de-duplication.
    pub crc: u16,
    /// Number of bits flipped to recover the frame (0 = clean decode).
    pub retries: u8,
}

#[derive(Debug)]
pub struct HdlcDeframer {
    state: DeframerState,
    /// Last eight post-NRZI bits, newest at the top.
    pat_det: u8,
    /// Previous raw bit for NRZI decoding.
    prev_raw: bool,
    nrzi: bool,
    raw_bits: Vec<u8>,
    fix_bits: u8,
    sanity: SanityCheck,
    /// Counters for the diagnostics snapshot.
    pub frames_ok: u64,
    pub frames_fixed: u64,
    pub fcs_errors: u64,
    /// Flags seen; feeds data-carrier detect.
    pub flags_seen: u64,
}

impl HdlcDeframer {
    /// `nrzi` selects NRZI decoding at the front (AFSK and scrambled
    /// baseband use it; PSK feeds data bits directly).
    pub fn new(nrzi: bool, fix_bits: u8, sanity: SanityCheck) -> Self {
        Self {
            state: DeframerState::Hunt,
            pat_det: 0,
            prev_raw: false,
            nrzi,
            raw_bits: Vec::with_capacity(4096),
            fix_bits,
            sanity,
            frames_ok: 0,
            frames_fixed: 0,
            fcs_errors: 0,
            flags_seen: 0,
        }
    }

    pub fn state(&self) -> DeframerState {
        self.state
    }

    /// Whether the deframer is currently inside a frame. Feeds DCD.
    pub fn in_frame(&self) -> bool {
        self.state == DeframerState::Sync && !self.raw_bits.is_empty()
    }

    /// Process one received bit. Returns a frame when a closing flag
    /// completes one with a valid (or fixable) FCS.
    pub fn rec_bit(&mut self, raw: bool) -> Option<DecodedFrame> {
        let dbit = if self.nrzi {
            let b = !(raw ^ self.prev_raw);
            self.prev_raw = raw;
            b
        } else {
            raw
        };

        let bit = dbit as u8;
        self.pat_det = (self.pat_det >> 1) | (bit << 7);

        match self.state {
            DeframerState::Hunt => {
                if self.pat_det == FLAG_PATTERN {
                    self.enter_sync();
                }
                None
            }
            DeframerState::AbortWait => {
                if self.pat_det == FLAG_PATTERN {
                    self.enter_sync();
                }
                None
            }
            DeframerState::Sync => {
                self.raw_bits.push(bit);
                if self.pat_det == FLAG_PATTERN {
                    let result = self.complete_frame();
                    self.enter_sync();
                    return result;
                }
                if self.pat_det & 0xFE == 0xFE {
                    // Seven ones: abort sequence.
                    self.state = DeframerState::AbortWait;
                    self.raw_bits.clear();
                    return None;
                }
                if self.raw_bits.len() > MAX_RAW_BITS {
                    self.state = DeframerState::Hunt;
                    self.raw_bits.clear();
                }
                None
            }
        }
    }

    fn enter_sync(&mut self) {
        self.state = DeframerState::Sync;
        self.raw_bits.clear();
        self.flags_seen += 1;
    }

    fn complete_frame(&mut self) -> Option<DecodedFrame> {
        // The closing flag contributed its eight bits to the buffer.
        if self.raw_bits.len() < 8 {
            return None;
        }
        let frame_bits = &self.raw_bits[..self.raw_bits.len() - 8];
        if frame_bits.len() < MIN_BODY_WITH_FCS * 8 {
            return None;
        }

        if let Some((body, crc)) = unstuff_and_check(frame_bits) {
            self.frames_ok += 1;
            return Some(DecodedFrame {
                body,
                crc,
                retries: 0,
            });
        }

        self.fcs_errors += 1;
        if self.fix_bits > 0 {
            if let Some((body, crc, retries)) =
                fixer::attempt_fix(frame_bits, self.fix_bits, self.sanity)
            {
                self.frames_fixed += 1;
                return Some(DecodedFrame { body, crc, retries });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{CallSign, Frame, PID_NO_LAYER3};
    use crate::hdlc::stuff::HdlcEncoder;

    fn test_frame() -> Frame {
        let dest: CallSign = "APRS".parse().unwrap();
        let src: CallSign = "N0CALL".parse().unwrap();
        Frame::new_ui(dest, src, &[], PID_NO_LAYER3, b"deframer test").unwrap()
    }

    /// Run a bit stream through the deframer with NRZI encoding applied,
    /// mimicking an AFSK channel.
    fn run_nrzi(deframer: &mut HdlcDeframer, bits: &[u8]) -> Vec<DecodedFrame> {
        let mut out = Vec::new();
        let mut level = false;
        for &b in bits {
            // NRZI: zero toggles, one holds.
            if b == 0 {
                level = !level;
            }
            if let Some(f) = deframer.rec_bit(level) {
                out.push(f);
            }
        }
        out
    }

    #[test]
    fn decodes_a_clean_frame() {
        let frame = test_frame();
        let mut enc = HdlcEncoder::new();
        enc.push_flags(8);
        enc.push_body(frame.as_bytes());
        enc.push_flags(2);

        let mut deframer = HdlcDeframer::new(true, 0, SanityCheck::None);
        let decoded = run_nrzi(&mut deframer, enc.bits());
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
        assert_eq!(decoded[0].retries, 0);
        assert_eq!(deframer.frames_ok, 1);
    }

    #[test]
    fn back_to_back_frames_share_the_stream() {
        let frame = test_frame();
        let mut enc = HdlcEncoder::new();
        enc.push_flags(4);
        enc.push_body(frame.as_bytes());
        enc.push_flag();
        enc.push_body(frame.as_bytes());
        enc.push_flags(2);

        let mut deframer = HdlcDeframer::new(true, 0, SanityCheck::None);
        let decoded = run_nrzi(&mut deframer, enc.bits());
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn corrupted_fcs_is_dropped_without_fixer() {
        let frame = test_frame();
        let mut enc = HdlcEncoder::new();
        enc.push_flags(4);
        enc.push_body(frame.as_bytes());
        enc.push_flags(2);
        let mut bits = enc.into_bits();
        // Flip one payload bit mid-frame.
        bits[4 * 8 + 40] ^= 1;

        let mut deframer = HdlcDeframer::new(true, 0, SanityCheck::None);
        let decoded = run_nrzi(&mut deframer, &bits);
        assert!(decoded.is_empty());
        assert_eq!(deframer.fcs_errors, 1);
    }

    #[test]
    fn single_bit_error_recovered_with_fixer() {
        let frame = test_frame();
        let mut enc = HdlcEncoder::new();
        enc.push_flags(4);
        enc.push_body(frame.as_bytes());
        enc.push_flags(2);
        let mut bits = enc.into_bits();
        bits[4 * 8 + 40] ^= 1;

        let mut deframer = HdlcDeframer::new(true, 1, SanityCheck::Ax25);
        let decoded = run_nrzi(&mut deframer, &bits);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
        assert_eq!(decoded[0].retries, 1);
        assert_eq!(deframer.frames_fixed, 1);
    }

    #[test]
    fn abort_discards_partial_frame() {
        let frame = test_frame();
        let mut enc = HdlcEncoder::new();
        enc.push_flags(2);
        enc.push_body(frame.as_bytes());
        let mut bits = enc.into_bits();
        // Truncate mid-frame and send an abort (eight ones), then idle.
        bits.truncate(bits.len() - 40);
        bits.extend_from_slice(&[1; 8]);
        bits.extend_from_slice(&[0; 16]);

        let mut deframer = HdlcDeframer::new(true, 0, SanityCheck::None);
        let decoded = run_nrzi(&mut deframer, &bits);
        assert!(decoded.is_empty());
        assert_eq!(deframer.state(), DeframerState::AbortWait);
    }
}
