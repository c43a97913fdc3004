//! Kitfox core library
//!
//! A soundcard TNC core: audio samples in, AX.25 frames out, and back
//! again. The receive side runs a bank of AFSK/PSK/scrambled-baseband
//! demodulators with parallel HDLC, FX.25 and IL2P deframing; the
//! transmit side arbitrates the channel with p-persistent CSMA and keys
//! PTT around each burst; a full AX.25 v2.0/v2.2 state machine provides
//! connected-mode links. Audio devices, configuration loading and client
//! serialization are external collaborators bound through the traits in
//! [`audio`], the structs in [`config`] and the event surface of
//! [`tnc::Tnc`].

pub mod audio;
pub mod config;
pub mod dlq;
pub mod dtmf;
pub mod errors;
pub mod fcs;
pub mod fec;
pub mod frame;
pub mod hdlc;
pub mod link;
pub mod logging;
pub mod modem;
pub mod ptt;
pub mod tnc;
pub mod transmit;
pub mod txq;

// Re-export the canonical assembly and the types its API surfaces.
pub use errors::{KitfoxError, Result};
pub use frame::{CallSign, Frame};
pub use tnc::{ChannelIo, ClientEvent, DeviceIo, Tnc};
