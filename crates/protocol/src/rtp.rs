//! RTP/RTCP (UDP)
//!
//! Der Mixer unterscheidet eingehende Pakete nur anhand des zweiten Bytes:
//! bei RTCP ist das der Pakettyp (200–206), bei RTP Marker-Bit + Payload-Typ.
//! Solange RTP-Payload-Typen ausserhalb von 72–78 liegen (RFC 5761), sind
//! beide Bereiche disjunkt.
//!
//! ## RTP-Header (12 Bytes ohne CSRC, RFC 3550)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   V(2) P(1) X(1) CC(4)
//!  1       1   M(1) PT(7)
//!  2       2   Sequenznummer (big-endian)
//!  4       4   Zeitstempel (big-endian)
//!  8       4   SSRC (big-endian)
//! 12      4*CC CSRC-Liste
//! ```

use std::io;

/// RTP-Version im Header
pub const RTP_VERSION: u8 = 2;

/// RTCP Sender Report
pub const RTCP_SENDER_PT: u8 = 200;
/// RTCP Receiver Report
pub const RTCP_RECEIVER_PT: u8 = 201;
/// RTCP Source Description
pub const RTCP_SDES_PT: u8 = 202;
/// RTCP Goodbye
pub const RTCP_BYE_PT: u8 = 203;
/// RTCP Transport-Layer-Feedback (RFC 4585)
pub const RTCP_RTP_FEEDBACK_PT: u8 = 205;
/// RTCP Payload-Specific-Feedback (RFC 4585)
pub const RTCP_PS_FEEDBACK_PT: u8 = 206;

// ---------------------------------------------------------------------------
// Typ-Dispatch
// ---------------------------------------------------------------------------

/// Ergebnis der Typ-Pruefung eines eingehenden Pakets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// RTCP Sender Report – geht an den RTCP-Empfangspfad
    SenderReport,
    /// Receiver Report oder Feedback – gehoert nicht auf den Audio-Empfangspfad
    Feedback(u8),
    /// Alles andere – geht an den RTP-Empfangspfad
    Media,
}

/// Liest den Pakettyp aus dem zweiten Byte
pub fn packet_type(buf: &[u8]) -> io::Result<u8> {
    buf.get(1).copied().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Paket zu kurz fuer Typ-Feld: {} Bytes", buf.len()),
        )
    })
}

/// Ordnet ein Paket einem Empfangspfad zu
pub fn classify(buf: &[u8]) -> io::Result<PacketKind> {
    let pt = packet_type(buf)?;
    Ok(match pt {
        RTCP_SENDER_PT => PacketKind::SenderReport,
        RTCP_RECEIVER_PT | RTCP_RTP_FEEDBACK_PT | RTCP_PS_FEEDBACK_PT => PacketKind::Feedback(pt),
        _ => PacketKind::Media,
    })
}

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// Fester Teil eines RTP-Headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Marker-Bit (z.B. erstes Paket nach Sendestart)
    pub marker: bool,
    /// Payload-Typ (0–127)
    pub payload_type: u8,
    /// Sequenznummer
    pub sequence: u16,
    /// Zeitstempel in Ticks der Codec-Abtastrate
    pub timestamp: u32,
    /// Synchronisation Source
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header-Groesse ohne CSRC-Liste
    pub const SIZE: usize = 12;

    /// Serialisiert den Header (ohne CSRC, ohne Extension)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = RTP_VERSION << 6;
        buf[1] = (self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0 };
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }
}

// ---------------------------------------------------------------------------
// RtpPacket
// ---------------------------------------------------------------------------

/// RTP-Paket mit Nutzdaten (CSRC, Extension und Padding bereits entfernt)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Erstellt ein Paket
    pub fn new(header: RtpHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Serialisiert das Paket
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RtpHeader::SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Deserialisiert ein Paket
    ///
    /// # Fehler
    /// - `InvalidData` bei falscher Version oder zu kurzem Paket
    /// - `InvalidData` wenn CSRC-Liste, Extension oder Padding nicht passen
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < RtpHeader::SIZE {
            return Err(ungueltig(format!(
                "RTP-Paket zu kurz: {} Bytes (mindestens {})",
                buf.len(),
                RtpHeader::SIZE
            )));
        }

        let version = buf[0] >> 6;
        if version != RTP_VERSION {
            return Err(ungueltig(format!("Ungueltige RTP-Version: {}", version)));
        }

        let padding = buf[0] & 0x20 != 0;
        let extension = buf[0] & 0x10 != 0;
        let csrc_anzahl = (buf[0] & 0x0F) as usize;

        let header = RtpHeader {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7F,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        };

        let mut offset = RtpHeader::SIZE + 4 * csrc_anzahl;
        if extension {
            if buf.len() < offset + 4 {
                return Err(ungueltig("Extension-Header abgeschnitten".into()));
            }
            let woerter = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4 + 4 * woerter;
        }

        let mut ende = buf.len();
        if padding {
            let n = buf[buf.len() - 1] as usize;
            if n == 0 || n > ende {
                return Err(ungueltig(format!("Ungueltiges Padding: {}", n)));
            }
            ende -= n;
        }

        if offset > ende {
            return Err(ungueltig(format!(
                "Header laenger als Paket: {} > {}",
                offset, ende
            )));
        }

        Ok(Self {
            header,
            payload: buf[offset..ende].to_vec(),
        })
    }
}

fn ungueltig(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rtcp(pt: u8) -> Vec<u8> {
        vec![0x80, pt, 0x00, 0x06, 0, 0, 0, 1]
    }

    #[test]
    fn sender_report_geht_an_rtcp_pfad() {
        assert_eq!(classify(&rtcp(RTCP_SENDER_PT)).unwrap(), PacketKind::SenderReport);
    }

    #[test]
    fn feedback_typen_werden_erkannt() {
        for pt in [RTCP_RECEIVER_PT, RTCP_RTP_FEEDBACK_PT, RTCP_PS_FEEDBACK_PT] {
            assert_eq!(classify(&rtcp(pt)).unwrap(), PacketKind::Feedback(pt));
        }
    }

    #[test]
    fn rtp_und_sonstiges_rtcp_geht_an_media_pfad() {
        let rtp = RtpPacket::new(
            RtpHeader {
                marker: true,
                payload_type: 0,
                sequence: 1,
                timestamp: 160,
                ssrc: 0xCAFE,
            },
            vec![0xFF; 160],
        );
        assert_eq!(classify(&rtp.encode()).unwrap(), PacketKind::Media);
        assert_eq!(classify(&rtcp(RTCP_BYE_PT)).unwrap(), PacketKind::Media);
        assert_eq!(classify(&rtcp(RTCP_SDES_PT)).unwrap(), PacketKind::Media);
    }

    #[test]
    fn zu_kurzes_paket_ist_fehler() {
        assert!(classify(&[0x80]).is_err());
        assert!(classify(&[]).is_err());
    }

    #[test]
    fn header_big_endian_und_marker() {
        let header = RtpHeader {
            marker: true,
            payload_type: 11,
            sequence: 0x0102,
            timestamp: 0x03040506,
            ssrc: 0x0708090A,
        };
        let bytes = header.encode();
        assert_eq!(bytes[0], 0x80, "Version 2, kein Padding/Extension/CSRC");
        assert_eq!(bytes[1], 0x80 | 11);
        assert_eq!(&bytes[2..4], &[0x01, 0x02]);
        assert_eq!(&bytes[4..8], &[0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&bytes[8..12], &[0x07, 0x08, 0x09, 0x0A]);
    }

    #[test]
    fn decode_ueberspringt_csrc_extension_und_padding() {
        let mut buf = vec![0xB1, 0x00, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        // 1 CSRC
        buf.extend_from_slice(&[0, 0, 0, 9]);
        // Extension mit einem Wort
        buf.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4]);
        // Nutzdaten + 2 Bytes Padding
        buf.extend_from_slice(&[0xAA, 0xBB, 0x00, 0x02]);

        let paket = RtpPacket::decode(&buf).expect("Paket muss dekodierbar sein");
        assert_eq!(paket.payload, vec![0xAA, 0xBB]);
        assert_eq!(paket.header.sequence, 1);
    }

    #[test]
    fn decode_falsche_version() {
        let mut buf = RtpPacket::new(
            RtpHeader {
                marker: false,
                payload_type: 0,
                sequence: 0,
                timestamp: 0,
                ssrc: 0,
            },
            vec![1, 2, 3],
        )
        .encode();
        buf[0] = 0x40;
        assert!(RtpPacket::decode(&buf).is_err());
    }

    #[test]
    fn decode_zu_kurz() {
        assert!(RtpPacket::decode(&[0x80; 8]).is_err());
    }
}
