//! Transport-Adapter zwischen Voice-Engine und Netzwerk
//!
//! Die Engine verschickt nichts selbst, sondern uebergibt fertige RTP/RTCP-
//! Pakete an einen registrierten externen Transport. `RelayTransport` leitet
//! sie an die Senken des Relays weiter:
//!
//! ```text
//! Ausgangskanal --RTP/RTCP--> RelayTransport --> RtpDataReceiver (Netzwerk)
//! Eingangskanal --RTCP------> RelayTransport --> FeedbackSink (Quelle)
//! ```

use mischpult_core::SourceId;
use std::sync::Arc;

/// Externer Transport eines Engine-Kanals
pub trait MediaTransport: Send + Sync {
    /// Verschickt ein RTP-Paket. `false` wenn es nicht zugestellt werden konnte.
    fn send_rtp(&self, paket: &[u8]) -> bool;
    /// Verschickt ein RTCP-Paket. `false` wenn es nicht zugestellt werden konnte.
    fn send_rtcp(&self, paket: &[u8]) -> bool;
}

/// Netzwerk-Senke fuer den gemischten Ausgangsstrom
pub trait RtpDataReceiver: Send + Sync {
    fn receive_rtp_data(&self, paket: &[u8]);
}

/// Rueckkanal zu einer einzelnen Quelle (RTCP-Feedback)
pub trait FeedbackSink: Send + Sync {
    fn deliver_feedback(&self, paket: &[u8]) -> bool;
}

/// Eine Media-Quelle aus Sicht des Mixers
///
/// Der Mixer fragt nur die Identitaet und – einmalig bei der Registrierung –
/// die Feedback-Senke ab.
pub trait MediaSource: Send + Sync {
    fn id(&self) -> SourceId;
    fn feedback_sink(&self) -> Arc<dyn FeedbackSink>;
}

/// Eingangsseite eines Media-Verarbeiters
///
/// Liefert die Anzahl konsumierter Bytes (0 = verworfen).
pub trait MediaSink: Send + Sync {
    fn deliver_audio_data(&self, paket: &[u8], quelle: &SourceId) -> usize;
    fn deliver_video_data(&self, paket: &[u8], quelle: &SourceId) -> usize;
}

// ---------------------------------------------------------------------------
// RelayTransport
// ---------------------------------------------------------------------------

/// Adapter von Engine-Transport auf Relay-Senken
///
/// RTP geht an den Receiver, RTCP an die Feedback-Senke (falls vorhanden),
/// sonst ebenfalls an den Receiver.
pub struct RelayTransport {
    receiver: Option<Arc<dyn RtpDataReceiver>>,
    feedback: Option<Arc<dyn FeedbackSink>>,
}

impl RelayTransport {
    /// Transport des Ausgangskanals (nur Netzwerk-Senke)
    pub fn outbound(receiver: Arc<dyn RtpDataReceiver>) -> Self {
        Self {
            receiver: Some(receiver),
            feedback: None,
        }
    }

    /// Feedback-Transport eines Eingangskanals (reine Sendeseite)
    pub fn feedback(feedback: Arc<dyn FeedbackSink>) -> Self {
        Self {
            receiver: None,
            feedback: Some(feedback),
        }
    }
}

impl MediaTransport for RelayTransport {
    fn send_rtp(&self, paket: &[u8]) -> bool {
        match &self.receiver {
            Some(receiver) => {
                receiver.receive_rtp_data(paket);
                true
            }
            None => {
                tracing::trace!(bytes = paket.len(), "RTP auf Feedback-Transport verworfen");
                false
            }
        }
    }

    fn send_rtcp(&self, paket: &[u8]) -> bool {
        if let Some(feedback) = &self.feedback {
            return feedback.deliver_feedback(paket);
        }
        match &self.receiver {
            Some(receiver) => {
                receiver.receive_rtp_data(paket);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Sammler(Mutex<Vec<Vec<u8>>>);

    impl RtpDataReceiver for Sammler {
        fn receive_rtp_data(&self, paket: &[u8]) {
            self.0.lock().push(paket.to_vec());
        }
    }

    impl FeedbackSink for Sammler {
        fn deliver_feedback(&self, paket: &[u8]) -> bool {
            self.0.lock().push(paket.to_vec());
            true
        }
    }

    #[test]
    fn outbound_leitet_rtp_und_rtcp_an_receiver() {
        let senke = Arc::new(Sammler::default());
        let transport = RelayTransport::outbound(senke.clone());

        assert!(transport.send_rtp(&[1, 2]));
        assert!(transport.send_rtcp(&[3]));
        assert_eq!(senke.0.lock().len(), 2);
    }

    #[test]
    fn feedback_transport_hat_keine_rtp_seite() {
        let senke = Arc::new(Sammler::default());
        let transport = RelayTransport::feedback(senke.clone());

        assert!(!transport.send_rtp(&[1, 2]), "RTP darf nicht zugestellt werden");
        assert!(transport.send_rtcp(&[0x80, 201]));
        assert_eq!(senke.0.lock().as_slice(), &[vec![0x80, 201]]);
    }
}
