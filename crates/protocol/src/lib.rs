//! mischpult-protocol – Wire-Level-Vertraege des Mixers
//!
//! Der Mixer besitzt kein eigenes Wire-Format. Dieses Crate enthaelt nur das,
//! was er von RTP/RTCP konsumiert: den Pakettyp im zweiten Byte, einen
//! minimalen RTP-Header fuer die Software-Engine und die Beschreibung des
//! Sende-Codecs.

pub mod codec;
pub mod rtp;

pub use codec::{ChannelCount, PayloadFormat, SampleRate, SendCodec};
pub use rtp::{classify, PacketKind, RtpHeader, RtpPacket};
