//! Kitfox error types with granular categories

use thiserror::Error;

/// Top-level error type for all kitfox operations
#[derive(Debug, Error)]
pub enum KitfoxError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Modem error: {0}")]
    Modem(#[from] ModemError),

    #[error("FEC error: {0}")]
    Fec(#[from] FecError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Frame structure errors: the FCS passed but the content is not a valid
/// AX.25 frame. These are logged and the frame is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Address count {count} outside the allowed 2..=10")]
    AddressCount { count: usize },

    #[error("Frame of {len} bytes is shorter than the minimum {min}")]
    TooShort { len: usize, min: usize },

    #[error("Frame of {len} bytes exceeds the {max} byte cap")]
    TooLong { len: usize, max: usize },

    #[error("Callsign {text:?} is not 1-6 upper-case alphanumeric characters")]
    BadCallsign { text: String },

    #[error("SSID {ssid} outside 0..=15")]
    BadSsid { ssid: u8 },

    #[error("Address field has no end-of-addresses bit within 10 addresses")]
    UnterminatedAddressField,

    #[error("Control field truncated")]
    TruncatedControl,

    #[error("Information field not allowed for this frame type")]
    UnexpectedInfo,

    #[error("PID octet missing on an information-bearing frame")]
    MissingPid,
}

/// Demodulator and modulator errors
#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Subchannels x slicers = {requested} exceeds the limit of {max} per channel")]
    TooManySlicers { requested: usize, max: usize },

    #[error("Unsupported bit rate {baud} at sample rate {sample_rate}")]
    UnsupportedRate { baud: f32, sample_rate: u32 },

    #[error("Channel {chan} is not configured")]
    UnknownChannel { chan: usize },
}

/// Reed-Solomon and FEC framing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FecError {
    #[error("Codeword of {len} bytes does not fit RS({n},{k})")]
    CodewordSize { len: usize, n: usize, k: usize },

    #[error("Uncorrectable codeword: {errors} errors exceed capacity {capacity}")]
    Uncorrectable { errors: usize, capacity: usize },

    #[error("Frame of {len} bytes too large for any FX.25 correlation tag")]
    FrameTooLarge { len: usize },

    #[error("IL2P payload of {len} bytes exceeds the {max} byte maximum")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("IL2P header does not translate: {reason}")]
    HeaderMismatch { reason: String },
}

/// Transmit queue errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("TX queue for channel {chan} is above the high-water mark ({depth} frames)")]
    Overflow { chan: usize, depth: usize },

    #[error("Channel {chan} has no transmitter")]
    NoTransmitter { chan: usize },
}

/// Link-layer upcall kinds. The session transitions to Disconnected and the
/// record is freed after a hold-down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Connection to {remote} timed out after {tries} tries")]
    ConnectTimedOut { remote: String, tries: u32 },

    #[error("{remote} disconnected")]
    Disconnected { remote: String },

    #[error("Link to {remote} reset by FRMR")]
    LinkReset { remote: String },

    #[error("Frame rejected on link to {remote}: {reason}")]
    FrameRejected { remote: String, reason: String },

    #[error("Retry limit reached on link to {remote}")]
    RetryExhausted { remote: String },
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Sample rate {rate} Hz outside the supported {min}..={max}")]
    SampleRateRange { rate: u32, min: u32, max: u32 },

    #[error("Channel count {channels} (devices carry 1 or 2 channels)")]
    BadChannelCount { channels: u8 },

    #[error("Mark/space tones {mark}/{space} Hz invalid for baud {baud}")]
    BadTones { mark: f32, space: f32, baud: f32 },

    #[error("PACLEN {paclen} outside 1..={max}")]
    BadPaclen { paclen: usize, max: usize },

    #[error("Window size {k} invalid for modulo {modulo}")]
    BadWindow { k: u8, modulo: u8 },

    #[error("Fix-bits depth {depth} not supported (0..=2)")]
    BadFixBits { depth: u8 },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Audio device errors. These terminate only the affected device thread.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Audio device closed (end of stream)")]
    EndOfStream,

    #[error("Audio device failed: {reason}")]
    Failed { reason: String },
}

/// Result type alias for kitfox operations
pub type Result<T> = std::result::Result<T, KitfoxError>;
