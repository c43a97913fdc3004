//! AX.25 frame data model
//!
//! A [`Frame`] is the immutable byte sequence between the opening flag and
//! the FCS: a stacked address field (2..=10 addresses of 7 octets), one or
//! two control octets, an optional PID and the information field. Accessors
//! parse on demand; constructors build well-formed frames.
//!
//! Callsign characters travel shifted left one bit so that the low bit of
//! every address octet can mark the end of the address field.

use std::fmt;
use std::str::FromStr;

use crate::errors::FrameError;

pub const MIN_ADDRS: usize = 2;
pub const MAX_ADDRS: usize = 10;
pub const ADDR_OCTETS: usize = 7;

/// Largest information field this implementation will carry. PACLEN caps
/// transmitted frames below this.
pub const MAX_INFO_LEN: usize = 2048;

/// Smallest plausible frame: two addresses plus one control octet.
pub const MIN_FRAME_LEN: usize = MIN_ADDRS * ADDR_OCTETS + 1;

/// Frame body cap used by the deframer's size gate.
pub const MAX_FRAME_LEN: usize = MAX_ADDRS * ADDR_OCTETS + 2 + 1 + MAX_INFO_LEN;

/// PID for traffic with no layer-3 protocol (APRS, plain connected data).
pub const PID_NO_LAYER3: u8 = 0xF0;

/// A callsign with its secondary station identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSign {
    call: [u8; 6],
    ssid: u8,
}

impl CallSign {
    /// Build from base text and SSID. The text must be 1-6 upper-case
    /// letters or digits.
    pub fn new(text: &str, ssid: u8) -> Result<Self, FrameError> {
        if ssid > 15 {
            return Err(FrameError::BadSsid { ssid });
        }
        let bytes = text.as_bytes();
        if bytes.is_empty()
            || bytes.len() > 6
            || !bytes.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(FrameError::BadCallsign {
                text: text.to_string(),
            });
        }
        let mut call = [b' '; 6];
        call[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { call, ssid })
    }

    /// Base callsign without the SSID.
    pub fn base(&self) -> &str {
        // Construction guarantees ASCII.
        std::str::from_utf8(&self.call)
            .unwrap_or("")
            .trim_end_matches(' ')
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Encode into 7 shifted octets. `flag` is the C bit (or H bit for a
    /// digipeater address); `last` sets the end-of-addresses bit.
    pub fn encode(&self, flag: bool, last: bool) -> [u8; ADDR_OCTETS] {
        let mut out = [0u8; ADDR_OCTETS];
        for (i, &ch) in self.call.iter().enumerate() {
            out[i] = ch << 1;
        }
        // Reserved bits are transmitted as ones.
        out[6] = (self.ssid << 1) | 0x60 | ((flag as u8) << 7) | (last as u8);
        out
    }

    /// Decode 7 shifted octets. Returns the callsign and its flag bit.
    pub fn decode(octets: &[u8]) -> Result<(Self, bool), FrameError> {
        let mut call = [b' '; 6];
        for i in 0..6 {
            call[i] = octets[i] >> 1;
        }
        let ssid = (octets[6] >> 1) & 0x0F;
        let flag = octets[6] & 0x80 != 0;
        Ok((Self { call, ssid }, flag))
    }

    /// Strict check used by the fixer's sanity filter: upper-case
    /// alphanumeric, left-justified with space padding, non-empty.
    pub fn is_strictly_valid(&self) -> bool {
        let mut seen_space = false;
        let mut any = false;
        for &ch in &self.call {
            if ch == b' ' {
                seen_space = true;
            } else {
                if seen_space {
                    return false;
                }
                if !(ch.is_ascii_uppercase() || ch.is_ascii_digit()) {
                    return false;
                }
                any = true;
            }
        }
        any
    }
}

impl fmt::Display for CallSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ssid == 0 {
            write!(f, "{}", self.base())
        } else {
            write!(f, "{}-{}", self.base(), self.ssid)
        }
    }
}

impl fmt::Debug for CallSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for CallSign {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, FrameError> {
        match s.split_once('-') {
            Some((base, ssid)) => {
                let ssid: u8 = ssid.parse().map_err(|_| FrameError::BadCallsign {
                    text: s.to_string(),
                })?;
                Self::new(base, ssid)
            }
            None => Self::new(s, 0),
        }
    }
}

/// One parsed entry of the address field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Address {
    pub call: CallSign,
    /// C bit for destination/source, has-been-repeated bit for digipeaters.
    pub flag: bool,
}

/// Sequence-number modulo negotiated for a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modulo {
    Eight,
    OneTwentyEight,
}

impl Modulo {
    pub fn value(self) -> u16 {
        match self {
            Modulo::Eight => 8,
            Modulo::OneTwentyEight => 128,
        }
    }
}

/// The three AX.25 frame categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameCategory {
    Information,
    Supervisory,
    Unnumbered,
}

/// Supervisory frame types, low control nibble without N(R).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SType {
    Rr,
    Rnr,
    Rej,
    Srej,
}

impl SType {
    fn code(self) -> u8 {
        match self {
            SType::Rr => 0x01,
            SType::Rnr => 0x05,
            SType::Rej => 0x09,
            SType::Srej => 0x0D,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(SType::Rr),
            0x05 => Some(SType::Rnr),
            0x09 => Some(SType::Rej),
            0x0D => Some(SType::Srej),
            _ => None,
        }
    }
}

/// Unnumbered frame types, control octet with the P/F bit masked out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UType {
    Sabme,
    Sabm,
    Disc,
    Dm,
    Ua,
    Frmr,
    Ui,
    Xid,
    Test,
}

impl UType {
    fn code(self) -> u8 {
        match self {
            UType::Sabme => 0x6F,
            UType::Sabm => 0x2F,
            UType::Disc => 0x43,
            UType::Dm => 0x0F,
            UType::Ua => 0x63,
            UType::Frmr => 0x87,
            UType::Ui => 0x03,
            UType::Xid => 0xAF,
            UType::Test => 0xE3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0x6F => Some(UType::Sabme),
            0x2F => Some(UType::Sabm),
            0x43 => Some(UType::Disc),
            0x0F => Some(UType::Dm),
            0x63 => Some(UType::Ua),
            0x87 => Some(UType::Frmr),
            0x03 => Some(UType::Ui),
            0xAF => Some(UType::Xid),
            0xE3 => Some(UType::Test),
            _ => None,
        }
    }

    /// Whether this type may carry an information field.
    pub fn info_allowed(self) -> bool {
        matches!(self, UType::Ui | UType::Xid | UType::Test | UType::Frmr)
    }
}

/// Fully decoded control field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    I { nr: u8, ns: u8, pf: bool },
    S { kind: SType, nr: u8, pf: bool },
    U { kind: UType, pf: bool },
}

/// Command/response indication from the address C bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdRes {
    Command,
    Response,
    /// Both C bits equal: pre-v2.0 station.
    Legacy,
}

/// An AX.25 frame body (no flags, no FCS).
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    naddr: usize,
}

impl Frame {
    /// Parse and structurally validate a received frame body.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                min: MIN_FRAME_LEN,
            });
        }
        if bytes.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLong {
                len: bytes.len(),
                max: MAX_FRAME_LEN,
            });
        }
        let mut naddr = 0;
        loop {
            let offset = naddr * ADDR_OCTETS;
            if offset + ADDR_OCTETS > bytes.len() {
                return Err(FrameError::UnterminatedAddressField);
            }
            naddr += 1;
            if bytes[offset + 6] & 0x01 != 0 {
                break;
            }
            if naddr == MAX_ADDRS {
                return Err(FrameError::UnterminatedAddressField);
            }
        }
        if naddr < MIN_ADDRS {
            return Err(FrameError::AddressCount { count: naddr });
        }
        if naddr * ADDR_OCTETS >= bytes.len() {
            return Err(FrameError::TruncatedControl);
        }
        Ok(Self {
            bytes: bytes.to_vec(),
            naddr,
        })
    }

    fn assemble(
        dest: CallSign,
        src: CallSign,
        via: &[CallSign],
        cr: CmdRes,
        control: &[u8],
        pid: Option<u8>,
        info: &[u8],
    ) -> Self {
        debug_assert!(via.len() <= MAX_ADDRS - MIN_ADDRS);
        let (dest_c, src_c) = match cr {
            CmdRes::Command => (true, false),
            CmdRes::Response => (false, true),
            CmdRes::Legacy => (false, false),
        };
        let naddr = 2 + via.len();
        let mut bytes =
            Vec::with_capacity(naddr * ADDR_OCTETS + control.len() + 1 + info.len());
        bytes.extend_from_slice(&dest.encode(dest_c, false));
        bytes.extend_from_slice(&src.encode(src_c, via.is_empty()));
        for (i, digi) in via.iter().enumerate() {
            bytes.extend_from_slice(&digi.encode(false, i + 1 == via.len()));
        }
        bytes.extend_from_slice(control);
        if let Some(pid) = pid {
            bytes.push(pid);
        }
        bytes.extend_from_slice(info);
        Self { bytes, naddr }
    }

    /// Unnumbered information frame, optionally through a digipeater path.
    pub fn new_ui(
        dest: CallSign,
        src: CallSign,
        via: &[CallSign],
        pid: u8,
        info: &[u8],
    ) -> Result<Self, FrameError> {
        Self::new_ui_full(dest, src, via, CmdRes::Command, false, pid, info)
    }

    /// UI frame with explicit command/response and P/F bits.
    pub fn new_ui_full(
        dest: CallSign,
        src: CallSign,
        via: &[CallSign],
        cr: CmdRes,
        pf: bool,
        pid: u8,
        info: &[u8],
    ) -> Result<Self, FrameError> {
        if info.len() > MAX_INFO_LEN {
            return Err(FrameError::TooLong {
                len: info.len(),
                max: MAX_INFO_LEN,
            });
        }
        if via.len() > MAX_ADDRS - MIN_ADDRS {
            return Err(FrameError::AddressCount {
                count: via.len() + 2,
            });
        }
        let control = UType::Ui.code() | ((pf as u8) << 4);
        Ok(Self::assemble(dest, src, via, cr, &[control], Some(pid), info))
    }

    /// Unnumbered frame (SABM, UA, DISC, ...) with optional info for the
    /// types that allow it (XID, TEST, FRMR).
    pub fn new_u(
        dest: CallSign,
        src: CallSign,
        kind: UType,
        cr: CmdRes,
        pf: bool,
        info: &[u8],
    ) -> Self {
        debug_assert!(info.is_empty() || kind.info_allowed());
        let control = kind.code() | ((pf as u8) << 4);
        Self::assemble(dest, src, &[], cr, &[control], None, info)
    }

    /// Supervisory frame in the given modulo.
    pub fn new_s(
        dest: CallSign,
        src: CallSign,
        kind: SType,
        modulo: Modulo,
        nr: u8,
        pf: bool,
        cr: CmdRes,
    ) -> Self {
        match modulo {
            Modulo::Eight => {
                let control = kind.code() | ((pf as u8) << 4) | (nr << 5);
                Self::assemble(dest, src, &[], cr, &[control], None, &[])
            }
            Modulo::OneTwentyEight => {
                let c0 = kind.code();
                let c1 = (nr << 1) | pf as u8;
                Self::assemble(dest, src, &[], cr, &[c0, c1], None, &[])
            }
        }
    }

    /// Information frame. I frames are always commands.
    pub fn new_i(
        dest: CallSign,
        src: CallSign,
        modulo: Modulo,
        nr: u8,
        ns: u8,
        pf: bool,
        pid: u8,
        info: &[u8],
    ) -> Result<Self, FrameError> {
        if info.len() > MAX_INFO_LEN {
            return Err(FrameError::TooLong {
                len: info.len(),
                max: MAX_INFO_LEN,
            });
        }
        let frame = match modulo {
            Modulo::Eight => {
                let control = (nr << 5) | ((pf as u8) << 4) | (ns << 1);
                Self::assemble(dest, src, &[], CmdRes::Command, &[control], Some(pid), info)
            }
            Modulo::OneTwentyEight => {
                let c0 = ns << 1;
                let c1 = (nr << 1) | pf as u8;
                Self::assemble(dest, src, &[], CmdRes::Command, &[c0, c1], Some(pid), info)
            }
        };
        Ok(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn addr_count(&self) -> usize {
        self.naddr
    }

    pub fn address(&self, index: usize) -> Address {
        debug_assert!(index < self.naddr);
        let offset = index * ADDR_OCTETS;
        let (call, flag) =
            CallSign::decode(&self.bytes[offset..offset + ADDR_OCTETS]).expect("bounded");
        Address { call, flag }
    }

    pub fn dest(&self) -> CallSign {
        self.address(0).call
    }

    pub fn src(&self) -> CallSign {
        self.address(1).call
    }

    /// Digipeater path, if any.
    pub fn via(&self) -> Vec<Address> {
        (2..self.naddr).map(|i| self.address(i)).collect()
    }

    pub fn cmd_res(&self) -> CmdRes {
        let dest_c = self.address(0).flag;
        let src_c = self.address(1).flag;
        match (dest_c, src_c) {
            (true, false) => CmdRes::Command,
            (false, true) => CmdRes::Response,
            _ => CmdRes::Legacy,
        }
    }

    fn control_offset(&self) -> usize {
        self.naddr * ADDR_OCTETS
    }

    pub fn category(&self) -> FrameCategory {
        let c = self.bytes[self.control_offset()];
        if c & 0x01 == 0 {
            FrameCategory::Information
        } else if c & 0x03 == 0x01 {
            FrameCategory::Supervisory
        } else {
            FrameCategory::Unnumbered
        }
    }

    /// Decode the control field. S and I frames need the link modulo; U
    /// frames are modulo-independent.
    pub fn frame_type(&self, modulo: Modulo) -> Result<FrameType, FrameError> {
        let offset = self.control_offset();
        let c0 = self.bytes[offset];
        match self.category() {
            FrameCategory::Unnumbered => {
                let kind = UType::from_code(c0 & !0x10).ok_or(FrameError::TruncatedControl)?;
                let pf = c0 & 0x10 != 0;
                if !kind.info_allowed() && !self.info_with_offset(offset + 1, false).is_empty() {
                    return Err(FrameError::UnexpectedInfo);
                }
                Ok(FrameType::U { kind, pf })
            }
            FrameCategory::Supervisory => match modulo {
                Modulo::Eight => {
                    let kind = SType::from_code(c0 & 0x0F).ok_or(FrameError::TruncatedControl)?;
                    Ok(FrameType::S {
                        kind,
                        nr: c0 >> 5,
                        pf: c0 & 0x10 != 0,
                    })
                }
                Modulo::OneTwentyEight => {
                    let c1 = *self
                        .bytes
                        .get(offset + 1)
                        .ok_or(FrameError::TruncatedControl)?;
                    let kind = SType::from_code(c0 & 0x0F).ok_or(FrameError::TruncatedControl)?;
                    Ok(FrameType::S {
                        kind,
                        nr: c1 >> 1,
                        pf: c1 & 0x01 != 0,
                    })
                }
            },
            FrameCategory::Information => {
                let (nr, ns, pf, ctl_len) = match modulo {
                    Modulo::Eight => (c0 >> 5, (c0 >> 1) & 0x07, c0 & 0x10 != 0, 1),
                    Modulo::OneTwentyEight => {
                        let c1 = *self
                            .bytes
                            .get(offset + 1)
                            .ok_or(FrameError::TruncatedControl)?;
                        (c1 >> 1, c0 >> 1, c1 & 0x01 != 0, 2)
                    }
                };
                if self.bytes.len() < offset + ctl_len + 1 {
                    return Err(FrameError::MissingPid);
                }
                Ok(FrameType::I { nr, ns, pf })
            }
        }
    }

    /// PID octet for I and UI frames.
    pub fn pid(&self, modulo: Modulo) -> Option<u8> {
        let offset = self.control_offset();
        match self.category() {
            FrameCategory::Information => {
                let ctl_len = match modulo {
                    Modulo::Eight => 1,
                    Modulo::OneTwentyEight => 2,
                };
                self.bytes.get(offset + ctl_len).copied()
            }
            FrameCategory::Unnumbered if self.bytes[offset] & !0x10 == UType::Ui.code() => {
                self.bytes.get(offset + 1).copied()
            }
            _ => None,
        }
    }

    fn info_with_offset(&self, start: usize, skip_pid: bool) -> &[u8] {
        let start = if skip_pid { start + 1 } else { start };
        self.bytes.get(start..).unwrap_or(&[])
    }

    /// Information field.
    pub fn info(&self, modulo: Modulo) -> &[u8] {
        let offset = self.control_offset();
        match self.category() {
            FrameCategory::Information => {
                let ctl_len = match modulo {
                    Modulo::Eight => 1,
                    Modulo::OneTwentyEight => 2,
                };
                self.info_with_offset(offset + ctl_len, true)
            }
            FrameCategory::Unnumbered => {
                let has_pid = self.bytes[offset] & !0x10 == UType::Ui.code();
                self.info_with_offset(offset + 1, has_pid)
            }
            FrameCategory::Supervisory => {
                let ctl_len = match modulo {
                    Modulo::Eight => 1,
                    Modulo::OneTwentyEight => 2,
                };
                self.info_with_offset(offset + ctl_len, false)
            }
        }
    }

    /// Sanity filter for the bit-flip fixer: all addresses must survive a
    /// strict decode.
    pub fn addresses_sane(&self) -> bool {
        (0..self.naddr).all(|i| self.address(i).call.is_strictly_valid())
    }
}

// Readable one-line rendering for logs: SRC>DEST,VIA*
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.src(), self.dest())?;
        for digi in self.via() {
            write!(f, ",{}{}", digi.call, if digi.flag { "*" } else { "" })?;
        }
        write!(f, " ({} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(s: &str) -> CallSign {
        s.parse().unwrap()
    }

    #[test]
    fn callsign_roundtrip() {
        let cs = call("N0CALL-5");
        assert_eq!(cs.base(), "N0CALL");
        assert_eq!(cs.ssid(), 5);
        assert_eq!(cs.to_string(), "N0CALL-5");

        let encoded = cs.encode(true, true);
        assert_eq!(encoded[0], b'N' << 1);
        assert_eq!(encoded[6] & 0x01, 1);
        assert_eq!(encoded[6] & 0x80, 0x80);
        let (decoded, flag) = CallSign::decode(&encoded).unwrap();
        assert_eq!(decoded, cs);
        assert!(flag);
    }

    #[test]
    fn callsign_rejects_junk() {
        assert!(CallSign::new("lower", 0).is_err());
        assert!(CallSign::new("TOOLONGCALL", 0).is_err());
        assert!(CallSign::new("N0CALL", 16).is_err());
        assert!(CallSign::new("", 0).is_err());
    }

    #[test]
    fn ui_frame_roundtrip() {
        let frame = Frame::new_ui(call("APRS"), call("N0CALL"), &[], PID_NO_LAYER3, b"test")
            .unwrap();
        let parsed = Frame::parse(frame.as_bytes()).unwrap();
        assert_eq!(parsed.dest().to_string(), "APRS");
        assert_eq!(parsed.src().to_string(), "N0CALL");
        assert_eq!(parsed.cmd_res(), CmdRes::Command);
        assert_eq!(parsed.category(), FrameCategory::Unnumbered);
        assert_eq!(
            parsed.frame_type(Modulo::Eight).unwrap(),
            FrameType::U {
                kind: UType::Ui,
                pf: false
            }
        );
        assert_eq!(parsed.pid(Modulo::Eight), Some(PID_NO_LAYER3));
        assert_eq!(parsed.info(Modulo::Eight), b"test");
    }

    #[test]
    fn ui_frame_with_path() {
        let via = [call("WIDE1-1"), call("WIDE2-2")];
        let frame =
            Frame::new_ui(call("APRS"), call("N0CALL-7"), &via, PID_NO_LAYER3, b"x").unwrap();
        assert_eq!(frame.addr_count(), 4);
        let path = frame.via();
        assert_eq!(path[0].call.to_string(), "WIDE1-1");
        assert!(!path[0].flag);
        assert_eq!(path[1].call.to_string(), "WIDE2-2");
    }

    #[test]
    fn sabm_and_ua_controls() {
        let sabm = Frame::new_u(
            call("REMOTE"),
            call("LOCAL"),
            UType::Sabm,
            CmdRes::Command,
            true,
            &[],
        );
        assert_eq!(sabm.as_bytes()[14], 0x2F | 0x10);
        assert_eq!(
            sabm.frame_type(Modulo::Eight).unwrap(),
            FrameType::U {
                kind: UType::Sabm,
                pf: true
            }
        );

        let ua = Frame::new_u(
            call("LOCAL"),
            call("REMOTE"),
            UType::Ua,
            CmdRes::Response,
            true,
            &[],
        );
        assert_eq!(ua.cmd_res(), CmdRes::Response);
        assert_eq!(
            ua.frame_type(Modulo::Eight).unwrap(),
            FrameType::U {
                kind: UType::Ua,
                pf: true
            }
        );
    }

    #[test]
    fn s_frame_modulo_8_and_128() {
        let rr8 = Frame::new_s(
            call("A"),
            call("B"),
            SType::Rr,
            Modulo::Eight,
            5,
            true,
            CmdRes::Response,
        );
        assert_eq!(
            rr8.frame_type(Modulo::Eight).unwrap(),
            FrameType::S {
                kind: SType::Rr,
                nr: 5,
                pf: true
            }
        );

        let srej128 = Frame::new_s(
            call("A"),
            call("B"),
            SType::Srej,
            Modulo::OneTwentyEight,
            100,
            false,
            CmdRes::Response,
        );
        assert_eq!(
            srej128.frame_type(Modulo::OneTwentyEight).unwrap(),
            FrameType::S {
                kind: SType::Srej,
                nr: 100,
                pf: false
            }
        );
    }

    #[test]
    fn i_frame_modulo_8_and_128() {
        let i8 = Frame::new_i(
            call("A"),
            call("B"),
            Modulo::Eight,
            3,
            6,
            false,
            PID_NO_LAYER3,
            b"hello",
        )
        .unwrap();
        assert_eq!(
            i8.frame_type(Modulo::Eight).unwrap(),
            FrameType::I {
                nr: 3,
                ns: 6,
                pf: false
            }
        );
        assert_eq!(i8.info(Modulo::Eight), b"hello");

        let i128 = Frame::new_i(
            call("A"),
            call("B"),
            Modulo::OneTwentyEight,
            90,
            115,
            true,
            PID_NO_LAYER3,
            b"x",
        )
        .unwrap();
        assert_eq!(
            i128.frame_type(Modulo::OneTwentyEight).unwrap(),
            FrameType::I {
                nr: 90,
                ns: 115,
                pf: true
            }
        );
        assert_eq!(i128.pid(Modulo::OneTwentyEight), Some(PID_NO_LAYER3));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(
            Frame::parse(&[0u8; 5]),
            Err(FrameError::TooShort { .. })
        ));
        // No end-of-addresses bit anywhere.
        let bytes = vec![0x40u8; 80];
        assert!(matches!(
            Frame::parse(&bytes),
            Err(FrameError::UnterminatedAddressField)
        ));
    }

    #[test]
    fn sanity_filter_flags_garbage_addresses() {
        let good = Frame::new_ui(call("APRS"), call("N0CALL"), &[], PID_NO_LAYER3, b"ok")
            .unwrap();
        assert!(good.addresses_sane());

        let mut bytes = good.as_bytes().to_vec();
        bytes[2] = 0x05; // non-alphanumeric after shift
        let parsed = Frame::parse(&bytes).unwrap();
        assert!(!parsed.addresses_sane());
    }
}
