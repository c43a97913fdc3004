//! IL2P: improved layer-2 protocol framing.
//!
//! An alternative to HDLC with no bit-stuffing: a 24-bit sync word, a
//! Reed-Solomon protected 13-byte header and RS-protected payload blocks,
//! all run through a self-synchronizing scrambler. A type 1 header
//! translates the common AX.25 header fields directly; anything it cannot
//! express (digipeater paths, modulo-128 controls, unusual PIDs) falls
//! back to a type 0 transparent header carrying the whole frame.
//!
//! IL2P bytes travel most-significant bit first, unlike AX.25.

use crate::config::{Il2pPolarity, Il2pStrength};
use crate::errors::FecError;
use crate::fcs;
use crate::frame::{CallSign, CmdRes, Frame, FrameType, Modulo, SType, UType};
use crate::hdlc::deframe::DecodedFrame;

use super::rs::il2p_codec;

/// Sync word, transmitted MSB first: 0xF1 0x5E 0x48.
pub const SYNC_WORD: u32 = 0xF15E48;

/// Scrambler/descrambler seed, both directions.
const LFSR_SEED: u16 = 0x01F0;

/// Header length before RS parity.
const HEADER_LEN: usize = 13;
/// RS parity symbols protecting the header.
const HEADER_PARITY: usize = 2;

/// Payload hard limit from the 10-bit size field.
pub const MAX_PAYLOAD: usize = 1023;

/// Largest data chunk in one payload block.
const MAX_BLOCK: usize = 239;

// ---------------------------------------------------------------------------
// Scrambler
// ---------------------------------------------------------------------------

/// Multiplicative scrambler, polynomial x^9 + x^4 + 1.
struct Scrambler {
    sr: u16,
}

impl Scrambler {
    fn new() -> Self {
        Self { sr: LFSR_SEED }
    }

    fn scramble_bit(&mut self, bit: u8) -> u8 {
        let out = bit ^ ((self.sr >> 3) & 1) as u8 ^ ((self.sr >> 8) & 1) as u8;
        self.sr = ((self.sr << 1) | out as u16) & 0x1FF;
        out
    }
}

/// Matching self-synchronizing descrambler.
struct Descrambler {
    sr: u16,
}

impl Descrambler {
    fn new() -> Self {
        Self { sr: LFSR_SEED }
    }

    fn descramble_bit(&mut self, bit: u8) -> u8 {
        let out = bit ^ ((self.sr >> 3) & 1) as u8 ^ ((self.sr >> 8) & 1) as u8;
        self.sr = ((self.sr << 1) | bit as u16) & 0x1FF;
        out
    }
}

fn scramble_bytes(data: &[u8]) -> Vec<u8> {
    let mut lfsr = Scrambler::new();
    map_bits_msb(data, |b| lfsr.scramble_bit(b))
}

fn descramble_bytes(data: &[u8]) -> Vec<u8> {
    let mut lfsr = Descrambler::new();
    map_bits_msb(data, |b| lfsr.descramble_bit(b))
}

fn map_bits_msb(data: &[u8], mut f: impl FnMut(u8) -> u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        let mut v = 0u8;
        for i in (0..8).rev() {
            v = (v << 1) | f((byte >> i) & 1);
        }
        out.push(v);
    }
    out
}

// ---------------------------------------------------------------------------
// PID translation
// ---------------------------------------------------------------------------

/// IL2P PID codes for supervisory and unnumbered frames.
const PID_SUPERVISOR: u8 = 0x0;
const PID_UNNUMBERED: u8 = 0x1;

fn pid_to_il2p(pid: u8) -> Option<u8> {
    match pid {
        0x01 => Some(0x3),
        0x06 => Some(0x4),
        0x07 => Some(0x5),
        0x08 => Some(0x6),
        0xCC => Some(0xB),
        0xCD => Some(0xC),
        0xCE => Some(0xD),
        0xCF => Some(0xE),
        0xF0 => Some(0xF),
        _ => None,
    }
}

fn pid_from_il2p(code: u8) -> Option<u8> {
    match code {
        0x2 => Some(0x10),
        0x3 => Some(0x01),
        0x4 => Some(0x06),
        0x5 => Some(0x07),
        0x6 => Some(0x08),
        0xB => Some(0xCC),
        0xC => Some(0xCD),
        0xD => Some(0xCE),
        0xE => Some(0xCF),
        0xF => Some(0xF0),
        _ => None,
    }
}

fn utype_to_opcode(kind: UType, cr: CmdRes) -> Option<u8> {
    let response = matches!(cr, CmdRes::Response);
    match kind {
        UType::Sabm => Some(0x1),
        UType::Disc => Some(0x3),
        UType::Dm => Some(0x4),
        UType::Ua => Some(0x6),
        UType::Frmr => Some(0x8),
        UType::Ui => Some(if response { 0xA } else { 0xB }),
        UType::Xid => Some(if response { 0xC } else { 0xD }),
        UType::Test => Some(if response { 0xE } else { 0xF }),
        UType::Sabme => None,
    }
}

fn utype_from_opcode(opcode: u8) -> Option<(UType, CmdRes)> {
    match opcode {
        0x1 => Some((UType::Sabm, CmdRes::Command)),
        0x3 => Some((UType::Disc, CmdRes::Command)),
        0x4 => Some((UType::Dm, CmdRes::Response)),
        0x6 => Some((UType::Ua, CmdRes::Response)),
        0x8 => Some((UType::Frmr, CmdRes::Response)),
        0xA => Some((UType::Ui, CmdRes::Response)),
        0xB => Some((UType::Ui, CmdRes::Command)),
        0xC => Some((UType::Xid, CmdRes::Response)),
        0xD => Some((UType::Xid, CmdRes::Command)),
        0xE => Some((UType::Test, CmdRes::Response)),
        0xF => Some((UType::Test, CmdRes::Command)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Header {
    /// Transparent: payload is the whole AX.25 frame body.
    Type0 { payload_len: usize, max_fec: bool },
    /// Translated AX.25 header; payload is the information field.
    Type1 {
        dest: CallSign,
        src: CallSign,
        ui: bool,
        pid: u8,
        control: u8,
        payload_len: usize,
        max_fec: bool,
    },
}

impl Header {
    fn payload_len(&self) -> usize {
        match self {
            Header::Type0 { payload_len, .. } | Header::Type1 { payload_len, .. } => *payload_len,
        }
    }

    fn max_fec(&self) -> bool {
        match self {
            Header::Type0 { max_fec, .. } | Header::Type1 { max_fec, .. } => *max_fec,
        }
    }

    /// Serialize into the 13 unscrambled header bytes.
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        match self {
            Header::Type0 {
                payload_len,
                max_fec,
            } => {
                if *max_fec {
                    out[0] |= 0x80;
                }
                put_payload_len(&mut out, *payload_len);
            }
            Header::Type1 {
                dest,
                src,
                ui,
                pid,
                control,
                payload_len,
                max_fec,
            } => {
                for (i, ch) in dest.base().bytes().chain(std::iter::repeat(b' ')).take(6).enumerate()
                {
                    out[i] = (ch - 0x20) & 0x3F;
                }
                for (i, ch) in src.base().bytes().chain(std::iter::repeat(b' ')).take(6).enumerate()
                {
                    out[6 + i] = (ch - 0x20) & 0x3F;
                }
                out[12] = (dest.ssid() << 4) | src.ssid();

                if *max_fec {
                    out[0] |= 0x80;
                }
                if *ui {
                    out[0] |= 0x40;
                }
                out[1] |= 0x80; // header type 1

                // PID nibble in the 0x40 bits of bytes 1..=4.
                for bit in 0..4 {
                    if pid & (0x8 >> bit) != 0 {
                        out[1 + bit] |= 0x40;
                    }
                }
                // Control field, 7 bits, in the 0x40 bits of bytes 5..=11.
                for bit in 0..7 {
                    if control & (0x40 >> bit) != 0 {
                        out[5 + bit] |= 0x40;
                    }
                }
                put_payload_len(&mut out, *payload_len);
            }
        }
        out
    }

    /// Parse 13 unscrambled header bytes.
    fn decode(data: &[u8]) -> Result<Self, FecError> {
        debug_assert_eq!(data.len(), HEADER_LEN);
        let max_fec = data[0] & 0x80 != 0;
        let payload_len = get_payload_len(data);
        if data[1] & 0x80 == 0 {
            return Ok(Header::Type0 {
                payload_len,
                max_fec,
            });
        }

        let decode_call = |chunk: &[u8], ssid: u8| -> Result<CallSign, FecError> {
            let text: String = chunk
                .iter()
                .map(|&b| ((b & 0x3F) + 0x20) as char)
                .collect::<String>()
                .trim_end()
                .to_string();
            CallSign::new(&text, ssid).map_err(|_| FecError::HeaderMismatch {
                reason: format!("callsign {:?} invalid", text),
            })
        };
        let dest = decode_call(&data[0..6], data[12] >> 4)?;
        let src = decode_call(&data[6..12], data[12] & 0x0F)?;

        let ui = data[0] & 0x40 != 0;
        let mut pid = 0u8;
        for bit in 0..4 {
            if data[1 + bit] & 0x40 != 0 {
                pid |= 0x8 >> bit;
            }
        }
        let mut control = 0u8;
        for bit in 0..7 {
            if data[5 + bit] & 0x40 != 0 {
                control |= 0x40 >> bit;
            }
        }

        Ok(Header::Type1 {
            dest,
            src,
            ui,
            pid,
            control,
            payload_len,
            max_fec,
        })
    }
}

/// The 10-bit payload size lives in the 0x80 bits of bytes 2..=11.
fn put_payload_len(out: &mut [u8; HEADER_LEN], len: usize) {
    debug_assert!(len <= MAX_PAYLOAD);
    for bit in 0..10 {
        if len & (0x200 >> bit) != 0 {
            out[2 + bit] |= 0x80;
        }
    }
}

fn get_payload_len(data: &[u8]) -> usize {
    let mut len = 0usize;
    for bit in 0..10 {
        if data[2 + bit] & 0x80 != 0 {
            len |= 0x200 >> bit;
        }
    }
    len
}

/// Build the translated header and payload for a frame, or fall back to
/// type 0 when the frame does not fit the type 1 fields.
fn translate(frame: &Frame, strength: Il2pStrength) -> Result<(Header, Vec<u8>), FecError> {
    let max_fec = strength == Il2pStrength::Max;

    let type0 = |body: &[u8]| -> Result<(Header, Vec<u8>), FecError> {
        if body.len() > MAX_PAYLOAD {
            return Err(FecError::PayloadTooLarge {
                len: body.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok((
            Header::Type0 {
                payload_len: body.len(),
                max_fec,
            },
            body.to_vec(),
        ))
    };

    if frame.addr_count() != 2 {
        return type0(frame.as_bytes());
    }
    let Ok(ftype) = frame.frame_type(Modulo::Eight) else {
        return type0(frame.as_bytes());
    };
    let cr = frame.cmd_res();

    let (ui, pid, control, payload): (bool, u8, u8, &[u8]) = match ftype {
        FrameType::U { kind: UType::Ui, pf } => {
            let Some(real_pid) = frame.pid(Modulo::Eight) else {
                return type0(frame.as_bytes());
            };
            let Some(code) = pid_to_il2p(real_pid) else {
                return type0(frame.as_bytes());
            };
            let Some(opcode) = utype_to_opcode(UType::Ui, cr) else {
                return type0(frame.as_bytes());
            };
            (true, code, (opcode << 2) | pf as u8, frame.info(Modulo::Eight))
        }
        FrameType::U { kind, pf } => match utype_to_opcode(kind, cr) {
            Some(opcode) => (
                false,
                PID_UNNUMBERED,
                (opcode << 2) | pf as u8,
                frame.info(Modulo::Eight),
            ),
            None => return type0(frame.as_bytes()),
        },
        FrameType::S { kind, nr, pf } => {
            let stype = match kind {
                SType::Rr => 0u8,
                SType::Rnr => 1,
                SType::Rej => 2,
                SType::Srej => 3,
            };
            let cr_bit = matches!(cr, CmdRes::Command) as u8;
            (
                false,
                PID_SUPERVISOR,
                ((pf as u8) << 6) | (nr << 3) | (cr_bit << 2) | stype,
                &[][..],
            )
        }
        FrameType::I { nr, ns, pf } => {
            let Some(real_pid) = frame.pid(Modulo::Eight) else {
                return type0(frame.as_bytes());
            };
            let Some(code) = pid_to_il2p(real_pid) else {
                return type0(frame.as_bytes());
            };
            (
                false,
                code,
                ((pf as u8) << 6) | (nr << 3) | ns,
                frame.info(Modulo::Eight),
            )
        }
    };

    if payload.len() > MAX_PAYLOAD {
        return Err(FecError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    Ok((
        Header::Type1 {
            dest: frame.dest(),
            src: frame.src(),
            ui,
            pid,
            control,
            payload_len: payload.len(),
            max_fec,
        },
        payload.to_vec(),
    ))
}

/// Rebuild the AX.25 frame from a received type 1 header and payload.
fn reconstruct(header: &Header, payload: &[u8]) -> Result<Frame, FecError> {
    let mismatch = |reason: &str| FecError::HeaderMismatch {
        reason: reason.to_string(),
    };

    match header {
        Header::Type0 { .. } => {
            Frame::parse(payload).map_err(|e| mismatch(&format!("type 0 payload: {}", e)))
        }
        Header::Type1 {
            dest,
            src,
            ui,
            pid,
            control,
            ..
        } => {
            let pf = control & 0x01 != 0;
            if *ui {
                let real_pid = pid_from_il2p(*pid).ok_or_else(|| mismatch("UI pid"))?;
                let (_, cr) =
                    utype_from_opcode((control >> 2) & 0x0F).ok_or_else(|| mismatch("UI opcode"))?;
                Frame::new_ui_full(*dest, *src, &[], cr, pf, real_pid, payload)
                    .map_err(|e| mismatch(&e.to_string()))
            } else if *pid == PID_SUPERVISOR {
                let stype = match control & 0x03 {
                    0 => SType::Rr,
                    1 => SType::Rnr,
                    2 => SType::Rej,
                    _ => SType::Srej,
                };
                let nr = (control >> 3) & 0x07;
                let pf = control & 0x40 != 0;
                let cr = if control & 0x04 != 0 {
                    CmdRes::Command
                } else {
                    CmdRes::Response
                };
                Ok(Frame::new_s(*dest, *src, stype, Modulo::Eight, nr, pf, cr))
            } else if *pid == PID_UNNUMBERED {
                let (kind, cr) =
                    utype_from_opcode((control >> 2) & 0x0F).ok_or_else(|| mismatch("U opcode"))?;
                Ok(Frame::new_u(*dest, *src, kind, cr, pf, payload))
            } else {
                let real_pid = pid_from_il2p(*pid).ok_or_else(|| mismatch("I pid"))?;
                let nr = (control >> 3) & 0x07;
                let ns = control & 0x07;
                let pf = control & 0x40 != 0;
                Frame::new_i(*dest, *src, Modulo::Eight, nr, ns, pf, real_pid, payload)
                    .map_err(|e| mismatch(&e.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Payload blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PayloadLayout {
    block_count: usize,
    big_size: usize,
    big_count: usize,
    small_size: usize,
    parity_per_block: usize,
}

fn payload_layout(len: usize, max_fec: bool) -> PayloadLayout {
    if len == 0 {
        return PayloadLayout {
            block_count: 0,
            big_size: 0,
            big_count: 0,
            small_size: 0,
            parity_per_block: 0,
        };
    }
    let block_count = len.div_ceil(MAX_BLOCK);
    let small_size = len / block_count;
    let big_count = len - small_size * block_count;
    let big_size = small_size + 1;
    let parity_per_block = if max_fec {
        16
    } else {
        (2 + small_size / 32).min(16)
    };
    PayloadLayout {
        block_count,
        big_size,
        big_count,
        small_size,
        parity_per_block,
    }
}

impl PayloadLayout {
    fn block_size(&self, index: usize) -> usize {
        if index < self.big_count {
            self.big_size
        } else {
            self.small_size
        }
    }

    /// Total on-air payload bytes including parity.
    fn wire_len(&self, payload_len: usize) -> usize {
        payload_len + self.block_count * self.parity_per_block
    }
}

// ---------------------------------------------------------------------------
// Transmit
// ---------------------------------------------------------------------------

/// Wrap a frame body for transmission. Returns the full byte sequence
/// (sync word, protected header, protected payload blocks), with polarity
/// applied. Bits go out MSB first.
pub fn wrap_frame(
    body: &[u8],
    strength: Il2pStrength,
    polarity: Il2pPolarity,
) -> Result<Vec<u8>, FecError> {
    let frame = Frame::parse(body).map_err(|e| FecError::HeaderMismatch {
        reason: e.to_string(),
    })?;
    let (header, payload) = translate(&frame, strength)?;

    let header_rs = il2p_codec(HEADER_PARITY);
    let scrambled_header = scramble_bytes(&header.encode());
    let header_parity = header_rs.encode(&scrambled_header)?;

    let layout = payload_layout(payload.len(), header.max_fec());
    let mut out = Vec::with_capacity(3 + HEADER_LEN + HEADER_PARITY + layout.wire_len(payload.len()));
    out.extend_from_slice(&SYNC_WORD.to_be_bytes()[1..]);
    out.extend_from_slice(&scrambled_header);
    out.extend_from_slice(&header_parity);

    if layout.block_count > 0 {
        let block_rs = il2p_codec(layout.parity_per_block);
        let mut offset = 0;
        for b in 0..layout.block_count {
            let size = layout.block_size(b);
            let scrambled = scramble_bytes(&payload[offset..offset + size]);
            let parity = block_rs.encode(&scrambled)?;
            out.extend_from_slice(&scrambled);
            out.extend_from_slice(&parity);
            offset += size;
        }
        debug_assert_eq!(offset, payload.len());
    }

    if polarity == Il2pPolarity::Inverted {
        for byte in &mut out {
            *byte = !*byte;
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Receive
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum RxState {
    Hunt,
    Header,
    Payload { header: Header },
}

/// Receive-side IL2P correlator and decoder, one per slicer. Both
/// polarities are detected automatically.
pub struct Il2pReceiver {
    state: RxState,
    /// 24-bit sync correlator.
    acc: u32,
    /// Polarity of the matched sync word; applied to all following bits.
    invert: bool,
    bytes: Vec<u8>,
    bit_acc: u8,
    nbits: u32,
    corrections: usize,
    pub frames_recovered: u64,
}

impl Default for Il2pReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Il2pReceiver {
    pub fn new() -> Self {
        Self {
            state: RxState::Hunt,
            acc: 0,
            invert: false,
            bytes: Vec::with_capacity(MAX_PAYLOAD + 96),
            bit_acc: 0,
            nbits: 0,
            corrections: 0,
            frames_recovered: 0,
        }
    }

    /// Feed one demodulated bit.
    pub fn rec_bit(&mut self, dbit: bool) -> Option<DecodedFrame> {
        if matches!(self.state, RxState::Hunt) {
            self.acc = ((self.acc << 1) | dbit as u32) & 0x00FF_FFFF;
            let normal = (self.acc ^ SYNC_WORD).count_ones();
            let inverted = (self.acc ^ !SYNC_WORD & 0x00FF_FFFF).count_ones();
            if normal <= 1 || inverted <= 1 {
                self.invert = inverted <= 1 && normal > 1;
                self.state = RxState::Header;
                self.bytes.clear();
                self.bit_acc = 0;
                self.nbits = 0;
                self.corrections = 0;
            }
            return None;
        }

        // MSB-first byte assembly, with polarity applied.
        let bit = (dbit ^ self.invert) as u8;
        self.bit_acc = (self.bit_acc << 1) | bit;
        self.nbits += 1;
        if self.nbits < 8 {
            return None;
        }
        let byte = self.bit_acc;
        self.bit_acc = 0;
        self.nbits = 0;
        self.bytes.push(byte);

        match &self.state {
            RxState::Header => {
                if self.bytes.len() < HEADER_LEN + HEADER_PARITY {
                    return None;
                }
                let mut codeword = std::mem::take(&mut self.bytes);
                let header_rs = il2p_codec(HEADER_PARITY);
                let corrected = match header_rs.decode(&mut codeword) {
                    Ok(c) => c,
                    Err(_) => {
                        self.reset();
                        return None;
                    }
                };
                self.corrections += corrected;
                let descrambled = descramble_bytes(&codeword[..HEADER_LEN]);
                match Header::decode(&descrambled) {
                    Ok(header) if header.payload_len() == 0 => {
                        let result = self.complete(&header, &[]);
                        self.reset();
                        result
                    }
                    Ok(header) => {
                        self.bytes = codeword;
                        self.bytes.clear();
                        self.state = RxState::Payload { header };
                        None
                    }
                    Err(_) => {
                        self.reset();
                        None
                    }
                }
            }
            RxState::Payload { header } => {
                let layout = payload_layout(header.payload_len(), header.max_fec());
                if self.bytes.len() < layout.wire_len(header.payload_len()) {
                    return None;
                }

                let header = header.clone();
                let wire = std::mem::take(&mut self.bytes);
                let block_rs = il2p_codec(layout.parity_per_block);
                let mut payload = Vec::with_capacity(header.payload_len());
                let mut offset = 0;
                for b in 0..layout.block_count {
                    let size = layout.block_size(b);
                    let mut codeword = wire[offset..offset + size + layout.parity_per_block].to_vec();
                    match block_rs.decode(&mut codeword) {
                        Ok(c) => self.corrections += c,
                        Err(_) => {
                            self.reset();
                            return None;
                        }
                    }
                    payload.extend_from_slice(&descramble_bytes(&codeword[..size]));
                    offset += size + layout.parity_per_block;
                }

                let result = self.complete(&header, &payload);
                self.reset();
                result
            }
            RxState::Hunt => unreachable!(),
        }
    }

    fn complete(&mut self, header: &Header, payload: &[u8]) -> Option<DecodedFrame> {
        let frame = reconstruct(header, payload).ok()?;
        let body = frame.as_bytes().to_vec();
        let crc = fcs::fcs_calc(&body);
        self.frames_recovered += 1;
        Some(DecodedFrame {
            body,
            crc,
            retries: self.corrections.min(u8::MAX as usize) as u8,
        })
    }

    fn reset(&mut self) {
        self.state = RxState::Hunt;
        self.acc = 0;
        self.bytes.clear();
        self.bit_acc = 0;
        self.nbits = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PID_NO_LAYER3;

    fn call(s: &str) -> CallSign {
        s.parse().unwrap()
    }

    fn feed(rx: &mut Il2pReceiver, bytes: &[u8]) -> Vec<DecodedFrame> {
        let mut out = Vec::new();
        for &byte in bytes {
            for i in (0..8).rev() {
                if let Some(f) = rx.rec_bit((byte >> i) & 1 != 0) {
                    out.push(f);
                }
            }
        }
        out
    }

    #[test]
    fn scrambler_descrambler_inverse() {
        let data: Vec<u8> = (0..64).map(|i| (i * 37 + 11) as u8).collect();
        assert_eq!(descramble_bytes(&scramble_bytes(&data)), data);
    }

    #[test]
    fn header_bits_roundtrip() {
        let header = Header::Type1 {
            dest: call("N0CALL-7"),
            src: call("W1AW"),
            ui: true,
            pid: 0xF,
            control: 0x2D,
            payload_len: 517,
            max_fec: true,
        };
        let encoded = header.encode();
        match Header::decode(&encoded).unwrap() {
            Header::Type1 {
                dest,
                src,
                ui,
                pid,
                control,
                payload_len,
                max_fec,
            } => {
                assert_eq!(dest, call("N0CALL-7"));
                assert_eq!(src, call("W1AW"));
                assert!(ui);
                assert_eq!(pid, 0xF);
                assert_eq!(control, 0x2D);
                assert_eq!(payload_len, 517);
                assert!(max_fec);
            }
            _ => panic!("expected type 1"),
        }
    }

    #[test]
    fn payload_layout_splits_evenly() {
        let layout = payload_layout(300, false);
        assert_eq!(layout.block_count, 2);
        assert_eq!(layout.small_size, 150);
        assert_eq!(layout.big_count, 0);
        assert_eq!(layout.parity_per_block, 2 + 150 / 32);

        let layout = payload_layout(301, false);
        assert_eq!(layout.block_count, 2);
        assert_eq!(layout.big_count, 1);
        assert_eq!(layout.big_size, 151);

        let layout = payload_layout(100, true);
        assert_eq!(layout.parity_per_block, 16);
    }

    #[test]
    fn ui_frame_roundtrip_type1() {
        let frame = Frame::new_ui(call("APRS"), call("N0CALL"), &[], PID_NO_LAYER3, b"il2p!")
            .unwrap();
        let wire = wrap_frame(
            frame.as_bytes(),
            Il2pStrength::Half,
            Il2pPolarity::Normal,
        )
        .unwrap();

        let mut rx = Il2pReceiver::new();
        let decoded = feed(&mut rx, &wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
    }

    #[test]
    fn supervisory_frame_roundtrip_no_payload() {
        let frame = Frame::new_s(
            call("N0CALL"),
            call("W1AW-4"),
            SType::Rr,
            Modulo::Eight,
            5,
            true,
            CmdRes::Response,
        );
        let wire = wrap_frame(
            frame.as_bytes(),
            Il2pStrength::Half,
            Il2pPolarity::Normal,
        )
        .unwrap();
        let mut rx = Il2pReceiver::new();
        let decoded = feed(&mut rx, &wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
    }

    #[test]
    fn i_frame_roundtrip_type1() {
        let frame = Frame::new_i(
            call("N0CALL"),
            call("W1AW"),
            Modulo::Eight,
            2,
            6,
            false,
            PID_NO_LAYER3,
            b"connected data",
        )
        .unwrap();
        let wire = wrap_frame(
            frame.as_bytes(),
            Il2pStrength::Max,
            Il2pPolarity::Normal,
        )
        .unwrap();
        let mut rx = Il2pReceiver::new();
        let decoded = feed(&mut rx, &wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
    }

    #[test]
    fn digipeater_path_falls_back_to_type0() {
        let via = [call("WIDE1-1")];
        let frame =
            Frame::new_ui(call("APRS"), call("N0CALL"), &via, PID_NO_LAYER3, b"path").unwrap();
        let (header, payload) = translate(&frame, Il2pStrength::Half).unwrap();
        assert!(matches!(header, Header::Type0 { .. }));
        assert_eq!(payload, frame.as_bytes());

        let wire = wrap_frame(
            frame.as_bytes(),
            Il2pStrength::Half,
            Il2pPolarity::Normal,
        )
        .unwrap();
        let mut rx = Il2pReceiver::new();
        let decoded = feed(&mut rx, &wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
    }

    #[test]
    fn inverted_polarity_detected() {
        let frame = Frame::new_ui(call("APRS"), call("N0CALL"), &[], PID_NO_LAYER3, b"upside")
            .unwrap();
        let wire = wrap_frame(
            frame.as_bytes(),
            Il2pStrength::Half,
            Il2pPolarity::Inverted,
        )
        .unwrap();
        let mut rx = Il2pReceiver::new();
        let decoded = feed(&mut rx, &wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
    }

    #[test]
    fn byte_errors_repaired_with_max_fec() {
        let frame = Frame::new_ui(
            call("APRS"),
            call("N0CALL"),
            &[],
            PID_NO_LAYER3,
            b"this payload will take some damage on the way",
        )
        .unwrap();
        let mut wire = wrap_frame(
            frame.as_bytes(),
            Il2pStrength::Max,
            Il2pPolarity::Normal,
        )
        .unwrap();

        // Damage the payload region (after sync + protected header).
        let payload_start = 3 + HEADER_LEN + HEADER_PARITY;
        for i in 0..6 {
            wire[payload_start + 2 + i * 5] ^= 0x3C;
        }

        let mut rx = Il2pReceiver::new();
        let decoded = feed(&mut rx, &wire);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].body, frame.as_bytes());
        assert!(decoded[0].retries >= 6);
    }

    #[test]
    fn oversize_payload_rejected() {
        let frame = Frame::new_ui(
            call("APRS"),
            call("N0CALL"),
            &[],
            PID_NO_LAYER3,
            &vec![b'z'; 1500],
        )
        .unwrap();
        assert!(matches!(
            wrap_frame(frame.as_bytes(), Il2pStrength::Half, Il2pPolarity::Normal),
            Err(FecError::PayloadTooLarge { .. })
        ));
    }
}
