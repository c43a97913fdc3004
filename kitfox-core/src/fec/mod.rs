//! Forward-error-correction framings layered around (FX.25) or replacing
//! (IL2P) the plain HDLC frame, plus the Reed-Solomon codec both share.
//!
//! On receive, both correlators run in parallel with the HDLC deframer on
//! every slicer's bit stream; the demodulator bank de-duplicates whichever
//! framing completes first. On transmit, exactly one framing is selected
//! per channel at configuration time.

pub mod fx25;
pub mod il2p;
pub mod rs;
