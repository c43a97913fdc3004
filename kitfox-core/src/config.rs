//! Configuration types for the TNC core.
//!
//! The external loader (config file, command line) deserializes into these
//! structs; the core only validates and consumes them.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Supported device sample-rate range in Hz.
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Hard limit on demodulator fan-out per channel.
pub const MAX_SUBCHANS_X_SLICERS: usize = 24;

/// One sound device. A stereo device carries two radio channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub bits_per_sample: u8,
    /// 1 = mono, 2 = stereo (left channel first).
    pub channels: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            bits_per_sample: 16,
            channels: 1,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate < MIN_SAMPLE_RATE || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::SampleRateRange {
                rate: self.sample_rate,
                min: MIN_SAMPLE_RATE,
                max: MAX_SAMPLE_RATE,
            });
        }
        if self.channels == 0 || self.channels > 2 {
            return Err(ConfigError::BadChannelCount {
                channels: self.channels,
            });
        }
        Ok(())
    }
}

/// Modem family for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModemKind {
    /// Two-tone AFSK (e.g. 1200 bps Bell 202).
    #[default]
    Afsk,
    /// Differential PSK, 2 bits per symbol (V.26).
    Qpsk,
    /// Differential PSK, 3 bits per symbol (V.27).
    EightPsk,
    /// Scrambled-NRZI baseband (G3RUH / K9NG, e.g. 9600 bps).
    Baseband,
}

/// V.26 defines two incompatible phase mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum V26Alternative {
    /// 0/90/180/270 degree phase shifts.
    A,
    /// 45/135/225/315 degree phase shifts.
    #[default]
    B,
}

/// Where the channel-busy indication comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DcdSource {
    /// Derived from demodulator flag/sync activity.
    #[default]
    Demod,
    /// External carrier-detect input line.
    External,
}

/// Which framing the transmitter uses. Receive always runs all three
/// correlators in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TxFraming {
    #[default]
    Hdlc,
    Fx25,
    Il2p,
}

/// FX.25 Reed-Solomon check-byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Fx25Strength {
    #[default]
    Check16,
    Check32,
    Check64,
}

impl Fx25Strength {
    pub fn check_bytes(self) -> usize {
        match self {
            Fx25Strength::Check16 => 16,
            Fx25Strength::Check32 => 32,
            Fx25Strength::Check64 => 64,
        }
    }
}

/// IL2P transmit polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Il2pPolarity {
    #[default]
    Normal,
    Inverted,
}

/// IL2P FEC strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Il2pStrength {
    /// Parity scales with block size.
    #[default]
    Half,
    /// 16 check bytes on every payload block.
    Max,
}

/// Sanity filter applied to frames recovered by the bit-flip fixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SanityCheck {
    /// Addresses must parse and look like APRS (printable info).
    #[default]
    Aprs,
    /// Addresses must parse as AX.25.
    Ax25,
    /// Anything with a good FCS is accepted.
    None,
}

/// One radio channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub modem: ModemKind,
    pub mark_freq: f32,
    pub space_freq: f32,
    /// PSK carrier frequency; ignored for the other modem kinds.
    pub carrier_freq: f32,
    pub baud: f32,
    /// Parallel demodulators at offset center frequencies.
    pub subchannels: u8,
    /// Threshold slicers per subchannel.
    pub slicers: u8,
    /// Center-frequency offset between adjacent subchannels.
    pub subchannel_spacing_hz: f32,
    /// Process every n-th sample (1 = no decimation).
    pub decimate: u8,
    /// Transmit upsample ratio (1 = device rate).
    pub upsample: u8,
    /// Demodulator profile letter, as printed in the decode spectrum.
    pub profile: char,
    pub v26: V26Alternative,
    pub dcd_source: DcdSource,
    /// An external input can hold off transmit entirely.
    pub has_tx_inhibit: bool,

    /// Channel-access timing, in 10 ms units except `persist`.
    pub dwait: u8,
    pub slottime: u8,
    pub persist: u8,
    pub txdelay: u8,
    pub txtail: u8,
    pub full_duplex: bool,

    pub tx_framing: TxFraming,
    pub fx25_strength: Fx25Strength,
    pub il2p_polarity: Il2pPolarity,
    pub il2p_strength: Il2pStrength,

    /// Bit-flip retry depth for frames that fail the FCS (0 = off).
    pub fix_bits: u8,
    pub sanity: SanityCheck,

    /// Run the DTMF detector on this channel.
    pub dtmf: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            modem: ModemKind::Afsk,
            mark_freq: 1200.0,
            space_freq: 2200.0,
            carrier_freq: 1800.0,
            baud: 1200.0,
            subchannels: 1,
            slicers: 1,
            subchannel_spacing_hz: 0.0,
            decimate: 1,
            upsample: 1,
            profile: 'A',
            v26: V26Alternative::default(),
            dcd_source: DcdSource::default(),
            has_tx_inhibit: false,
            dwait: 0,
            slottime: 10,
            persist: 63,
            txdelay: 30,
            txtail: 10,
            full_duplex: false,
            tx_framing: TxFraming::default(),
            fx25_strength: Fx25Strength::default(),
            il2p_polarity: Il2pPolarity::default(),
            il2p_strength: Il2pStrength::default(),
            fix_bits: 0,
            sanity: SanityCheck::default(),
            dtmf: false,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fanout = self.subchannels as usize * self.slicers.max(1) as usize;
        if fanout == 0 || fanout > MAX_SUBCHANS_X_SLICERS {
            return Err(ConfigError::Invalid {
                field: "subchannels/slicers",
                reason: format!(
                    "{} x {} exceeds the limit of {}",
                    self.subchannels, self.slicers, MAX_SUBCHANS_X_SLICERS
                ),
            });
        }
        if self.baud < 100.0 {
            return Err(ConfigError::Invalid {
                field: "baud",
                reason: format!("{} bps below the 100 bps floor", self.baud),
            });
        }
        if self.modem == ModemKind::Afsk
            && (self.mark_freq <= 0.0
                || self.space_freq <= 0.0
                || (self.mark_freq - self.space_freq).abs() < self.baud / 2.0)
        {
            return Err(ConfigError::BadTones {
                mark: self.mark_freq,
                space: self.space_freq,
                baud: self.baud,
            });
        }
        if self.fix_bits > 2 {
            return Err(ConfigError::BadFixBits {
                depth: self.fix_bits,
            });
        }
        if self.decimate == 0 || self.upsample == 0 {
            return Err(ConfigError::Invalid {
                field: "decimate/upsample",
                reason: "ratios must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Number of leading flag octets to fill TXDELAY at this channel's baud.
    pub fn txdelay_flags(&self) -> usize {
        flags_for_interval(self.txdelay, self.baud)
    }

    /// Number of trailing flag octets to fill TXTAIL.
    pub fn txtail_flags(&self) -> usize {
        flags_for_interval(self.txtail, self.baud)
    }
}

fn flags_for_interval(units_10ms: u8, baud: f32) -> usize {
    let bits = units_10ms as f32 * 0.01 * baud;
    ((bits / 8.0).ceil() as usize).max(1)
}

/// Connected-mode (AX.25 data link) parameters, shared by all channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Maximum information field length.
    pub paclen: usize,
    /// Retry limit N2.
    pub n2: u32,
    /// Initial T1 (acknowledgement) period in milliseconds.
    pub t1v_ms: u64,
    /// Response-delay T2 in milliseconds.
    pub t2_ms: u64,
    /// Idle-link keepalive T3 in milliseconds (0 = disabled).
    pub t3_ms: u64,
    /// Window size k for modulo-8 links.
    pub maxframe: u8,
    /// Window size k for modulo-128 links.
    pub emaxframe: u8,
    /// SABME attempts before falling back to v2.0 SABM.
    pub maxv22: u32,
    /// Peers known to speak only AX.25 v2.0.
    pub v20_peers: Vec<String>,
    /// Peers that must not be sent XID.
    pub no_xid_peers: Vec<String>,
    /// Session hold-down after disconnect, in milliseconds.
    pub holddown_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            paclen: 256,
            n2: 10,
            t1v_ms: 3000,
            t2_ms: 100,
            t3_ms: 300_000,
            maxframe: 7,
            emaxframe: 32,
            maxv22: 3,
            v20_peers: Vec::new(),
            no_xid_peers: Vec::new(),
            holddown_ms: 15_000,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paclen == 0 || self.paclen > crate::frame::MAX_INFO_LEN {
            return Err(ConfigError::BadPaclen {
                paclen: self.paclen,
                max: crate::frame::MAX_INFO_LEN,
            });
        }
        if self.maxframe == 0 || self.maxframe > 7 {
            return Err(ConfigError::BadWindow {
                k: self.maxframe,
                modulo: 8,
            });
        }
        if self.emaxframe == 0 || self.emaxframe > 127 {
            return Err(ConfigError::BadWindow {
                k: self.emaxframe,
                modulo: 128,
            });
        }
        Ok(())
    }
}

/// Complete core configuration: devices, the channels they carry, and the
/// global link parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TncConfig {
    pub devices: Vec<DeviceConfig>,
    pub channels: Vec<ChannelConfig>,
    pub link: LinkConfig,
    /// Seed for the CSMA persistence lottery; None draws from the OS.
    pub rng_seed: Option<u64>,
}

impl TncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for dev in &self.devices {
            dev.validate()?;
        }
        let carried: usize = self.devices.iter().map(|d| d.channels as usize).sum();
        if self.channels.len() > carried {
            return Err(ConfigError::Invalid {
                field: "channels",
                reason: format!(
                    "{} channels configured but devices carry only {}",
                    self.channels.len(),
                    carried
                ),
            });
        }
        for chan in &self.channels {
            chan.validate()?;
        }
        self.link.validate()
    }
}
