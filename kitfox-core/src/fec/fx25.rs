//! FX.25 forward-error-correction wrapper around the HDLC frame.
//!
//! The transmitter packs the complete bit-stuffed HDLC frame (flags
//! included) into the data part of a Reed-Solomon codeword, prepends a
//! 64-bit correlation tag identifying the (n, k) configuration, and pads
//! unused data bytes with the flag pattern. A legacy receiver simply sees
//! noise around an ordinary HDLC frame; an FX.25 receiver can repair byte
//! errors before deframing.

use crate::config::Fx25Strength;
use crate::errors::FecError;
use crate::fec::rs::{fx25_codec, ReedSolomon};
use crate::hdlc::deframe::{DecodedFrame, HdlcDeframer};
use crate::hdlc::stuff::{pack_bits_flag_padded, HdlcEncoder};

/// Correlation tags from the FX.25 specification. Each encodes one
/// (n, k) Reed-Solomon configuration; the values have large mutual
/// Hamming distance so a noisy match is still unambiguous.
pub const TAGS: [(u64, usize, usize); 11] = [
    (0xB74D_B7DF_8A53_2F3E, 255, 239),
    (0x26FF_60A6_00CC_8FDE, 144, 128),
    (0xC7DC_0508_F3D9_B09E, 80, 64),
    (0x8F05_6EB4_3696_60EE, 48, 32),
    (0x6E26_0B1A_C583_5FAE, 255, 223),
    (0xFF94_DC63_4F1C_FF4E, 160, 128),
    (0x1EB7_B9CD_BC09_C00E, 96, 64),
    (0xDBF8_69BD_2DBB_1776, 64, 32),
    (0x3ADB_0C13_DEAE_2836, 255, 191),
    (0xAB69_DB6A_5431_88D6, 192, 128),
    (0x4A4A_BEC4_A724_B796, 128, 64),
];

/// Bit errors tolerated when matching a correlation tag.
const TAG_HAMMING_LIMIT: u32 = 2;

/// Pick the smallest (n, k) whose data part holds `data_bytes` at the
/// requested check-byte strength.
fn choose_tag(data_bytes: usize, strength: Fx25Strength) -> Option<usize> {
    let check = strength.check_bytes();
    TAGS.iter()
        .enumerate()
        .filter(|(_, &(_, n, k))| n - k == check && k >= data_bytes)
        .min_by_key(|(_, &(_, _, k))| k)
        .map(|(i, _)| i)
}

/// Wrap a frame body for transmission. Returns the full byte sequence:
/// tag (low byte first) + k data bytes + parity.
pub fn wrap_frame(body: &[u8], strength: Fx25Strength) -> Result<Vec<u8>, FecError> {
    let mut enc = HdlcEncoder::new();
    enc.push_flag();
    enc.push_body(body);
    enc.push_flag();
    let bits = enc.into_bits();
    let data_bytes = bits.len().div_ceil(8);

    let tag_idx =
        choose_tag(data_bytes, strength).ok_or(FecError::FrameTooLarge { len: data_bytes })?;
    let (tag, n, k) = TAGS[tag_idx];

    let data = pack_bits_flag_padded(&bits, k);
    debug_assert_eq!(data.len(), k);

    let rs = fx25_codec(n - k);
    let parity = rs.encode(&data)?;

    let mut out = Vec::with_capacity(8 + n);
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&parity);
    Ok(out)
}

#[derive(Debug)]
enum RxState {
    Hunt,
    /// Collecting the n-byte codeword for the matched tag.
    Collect { tag_idx: usize },
}

/// Receive-side FX.25 correlator and decoder, one per slicer. Runs on the
/// same post-NRZI bit stream as the HDLC deframer.
pub struct Fx25Receiver {
    state: RxState,
    /// Tag correlator shift register, newest bit at the top.
    acc: u64,
    /// Codeword accumulator.
    bytes: Vec<u8>,
    bit_acc: u8,
    nbits: u32,
    codecs: [ReedSolomon; 3],
    /// Codewords successfully repaired, for diagnostics.
    pub frames_recovered: u64,
}

impl Default for Fx25Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Fx25Receiver {
    pub fn new() -> Self {
        Self {
            state: RxState::Hunt,
            acc: 0,
            bytes: Vec::with_capacity(255),
            bit_acc: 0,
            nbits: 0,
            codecs: [fx25_codec(16), fx25_codec(32), fx25_codec(64)],
            frames_recovered: 0,
        }
    }

    fn codec_for(&self, nroots: usize) -> &ReedSolomon {
        match nroots {
            16 => &self.codecs[0],
            32 => &self.codecs[1],
            _ => &self.codecs[2],
        }
    }

    /// Feed one post-NRZI bit. Returns a recovered frame when a codeword
    /// completes and its HDLC content checks out.
    pub fn rec_bit(&mut self, dbit: bool) -> Option<DecodedFrame> {
        self.acc = (self.acc >> 1) | ((dbit as u64) << 63);

        match self.state {
            RxState::Hunt => {
                for (i, &(tag, _, _)) in TAGS.iter().enumerate() {
                    if (self.acc ^ tag).count_ones() <= TAG_HAMMING_LIMIT {
                        self.state = RxState::Collect { tag_idx: i };
                        self.bytes.clear();
                        self.bit_acc = 0;
                        self.nbits = 0;
                        break;
                    }
                }
                None
            }
            RxState::Collect { tag_idx } => {
                // Bytes assemble LSB first, matching the HDLC bit order.
                self.bit_acc >>= 1;
                if dbit {
                    self.bit_acc |= 0x80;
                }
                self.nbits += 1;
                if self.nbits == 8 {
                    self.bytes.push(self.bit_acc);
                    self.bit_acc = 0;
                    self.nbits = 0;
                }
                let (_, n, k) = TAGS[tag_idx];
                if self.bytes.len() == n {
                    self.state = RxState::Hunt;
                    return self.finish_codeword(n, k);
                }
                None
            }
        }
    }

    fn finish_codeword(&mut self, n: usize, k: usize) -> Option<DecodedFrame> {
        let mut codeword = std::mem::take(&mut self.bytes);
        let rs = self.codec_for(n - k);
        let corrected = match rs.decode(&mut codeword) {
            Ok(c) => c,
            Err(_) => {
                self.bytes = codeword;
                self.bytes.clear();
                return None;
            }
        };

        // The repaired data part is a normal flagged HDLC stream.
        let mut deframer = HdlcDeframer::new(false, 0, crate::config::SanityCheck::None);
        let mut result = None;
        for &byte in &codeword[..k] {
            for i in 0..8 {
                if let Some(frame) = deframer.rec_bit((byte >> i) & 1 != 0) {
                    result = Some(frame);
                }
            }
        }
        self.bytes = codeword;
        self.bytes.clear();

        result.map(|mut f| {
            f.retries = corrected.min(u8::MAX as usize) as u8;
            self.frames_recovered += 1;
            f
        })
    }
}
