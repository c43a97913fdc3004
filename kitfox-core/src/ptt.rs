//! Push-to-talk abstraction.
//!
//! The core depends only on the capability set: assert, deassert, query.
//! Concrete realizations (serial control lines, GPIO, HID reports, rig
//! control) are external collaborators selected by a typed descriptor.
//! The on-edge must precede the first TXDELAY bit and the off-edge must
//! follow the last TXTAIL bit; any hardware switching asymmetry is
//! expressed through [`PttTiming`].

use serde::{Deserialize, Serialize};

use crate::errors::DeviceError;

/// Descriptor for an external PTT realization. The core never interprets
/// the fields; the device layer maps them to hardware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PttMethod {
    /// No keying line (e.g. VOX or full-duplex sound device).
    #[default]
    None,
    /// RTS or DTR on a serial port.
    Serial {
        port: String,
        line: SerialLine,
        invert: bool,
    },
    /// A GPIO line by chip and offset.
    Gpio {
        chip: String,
        line: u32,
        invert: bool,
    },
    /// A bit in an output HID report (USB sound-card GPIO).
    Hid {
        device: String,
        bit: u8,
    },
    /// A CAT command through a rig-control backend.
    Rig {
        model: u32,
        port: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialLine {
    Rts,
    Dtr,
}

/// Hardware switching delays around the keying edges, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PttTiming {
    /// Extra wait after the on-edge before audio starts.
    pub on_delay_ms: u64,
    /// Extra wait after audio ends before the off-edge.
    pub off_delay_ms: u64,
}

/// The capability set the core requires from a PTT back-end.
pub trait PttBackend: Send {
    fn assert(&mut self) -> Result<(), DeviceError>;
    fn deassert(&mut self) -> Result<(), DeviceError>;
    fn query(&self) -> bool;
}

/// In-memory back-end for tests and PTT-less configurations.
#[derive(Debug, Default)]
pub struct NullPtt {
    on: bool,
    /// Keying edges observed, for assertions in tests.
    pub transitions: u32,
}

impl PttBackend for NullPtt {
    fn assert(&mut self) -> Result<(), DeviceError> {
        if !self.on {
            self.on = true;
            self.transitions += 1;
        }
        Ok(())
    }

    fn deassert(&mut self) -> Result<(), DeviceError> {
        if self.on {
            self.on = false;
            self.transitions += 1;
        }
        Ok(())
    }

    fn query(&self) -> bool {
        self.on
    }
}
