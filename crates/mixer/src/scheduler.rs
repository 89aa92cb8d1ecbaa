//! Periodischer Mix-Thread
//!
//! Ein eigener Thread wartet per `recv_deadline` auf den naechsten
//! Zeitpunkt. Der Abbruch-Kanal ist gleichzeitig Timer und Cancel-Token:
//! Timeout bedeutet regulaerer Tick, eine Nachricht bedeutet Abbruch.
//!
//! Zustandsmaschine:
//! ```text
//! Running --stoppen()--> Draining --letzter Tick--> Stopped
//! ```
//! Der Zustand wird auf `Draining` gesetzt bevor das Abbruch-Signal
//! verschickt wird. Ein Tick, der gleichzeitig mit dem Abbruch ablaeuft,
//! sieht deshalb immer schon `Draining` und plant sich nicht neu ein.
//! Jede Beendigung endet mit genau einem Aufruf ohne `Expired`.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Name des Mix-Threads
const THREAD_NAME: &str = "mischpult-mix";

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Zustand der Mix-Schleife
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl LoopState {
    fn aus_u8(wert: u8) -> Self {
        match wert {
            0 => LoopState::Running,
            1 => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }
}

/// Geteilter Lesezugriff auf den Schleifen-Zustand
#[derive(Debug, Clone)]
pub struct LoopStateHandle(Arc<AtomicU8>);

impl LoopStateHandle {
    pub fn neu() -> Self {
        Self(Arc::new(AtomicU8::new(LoopState::Running as u8)))
    }

    pub fn zustand(&self) -> LoopState {
        LoopState::aus_u8(self.0.load(Ordering::Acquire))
    }

    pub fn laeuft(&self) -> bool {
        self.zustand() == LoopState::Running
    }

    /// Running -> Draining, genau einmal. `true` wenn dieser Aufruf umgeschaltet hat.
    fn abschliessen(&self) -> bool {
        self.0
            .compare_exchange(
                LoopState::Running as u8,
                LoopState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn beendet(&self) {
        self.0.store(LoopState::Stopped as u8, Ordering::Release);
    }
}

impl Default for LoopStateHandle {
    fn default() -> Self {
        Self::neu()
    }
}

/// Status, mit dem der Tick-Handler aufgerufen wird
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Regulaerer Tick
    Expired,
    /// Letzter Aufruf nach `stoppen()`
    Cancelled,
    /// Abbruch-Kanal ohne Signal geschlossen
    Disconnected,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Naechster Ablaufzeitpunkt mit fester Periode
///
/// `reschedule` rechnet vom vorherigen Sollzeitpunkt weiter, nicht von
/// "jetzt". Verspaetete Ticks verschieben die folgenden daher nicht.
#[derive(Debug, Clone)]
pub struct MixTimer {
    periode: Duration,
    expires_at: Instant,
}

impl MixTimer {
    pub fn neu(periode: Duration) -> Self {
        Self::ab(Instant::now(), periode)
    }

    pub fn ab(start: Instant, periode: Duration) -> Self {
        Self {
            periode,
            expires_at: start + periode,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn periode(&self) -> Duration {
        self.periode
    }

    pub fn reschedule(&mut self) {
        self.expires_at += self.periode;
    }
}

// ---------------------------------------------------------------------------
// MixScheduler
// ---------------------------------------------------------------------------

/// Treibt einen Handler im festen Takt auf einem eigenen Thread
pub struct MixScheduler {
    zustand: LoopStateHandle,
    abbruch: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MixScheduler {
    /// Startet den Mix-Thread
    pub fn start<F>(periode: Duration, handler: F) -> std::io::Result<Self>
    where
        F: FnMut(TickStatus) + Send + 'static,
    {
        Self::start_with_state(periode, LoopStateHandle::neu(), handler)
    }

    /// Wie [`start`](Self::start), mit vorgegebenem Zustands-Handle
    pub fn start_with_state<F>(
        periode: Duration,
        zustand: LoopStateHandle,
        handler: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut(TickStatus) + Send + 'static,
    {
        let (abbruch_tx, abbruch_rx) = bounded::<()>(1);
        let timer = MixTimer::neu(periode);
        let thread_zustand = zustand.clone();

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || mix_schleife(timer, abbruch_rx, thread_zustand, handler))?;

        tracing::debug!(periode_ms = periode.as_millis() as u64, "Mix-Thread gestartet");

        Ok(Self {
            zustand,
            abbruch: Some(abbruch_tx),
            thread: Some(thread),
        })
    }

    pub fn zustand(&self) -> LoopState {
        self.zustand.zustand()
    }

    pub fn zustand_handle(&self) -> LoopStateHandle {
        self.zustand.clone()
    }

    /// Beendet die Schleife und wartet auf den Thread
    ///
    /// Idempotent. Nach der Rueckkehr laeuft kein Tick mehr.
    pub fn stoppen(&mut self) {
        if self.zustand.abschliessen() {
            tracing::debug!("Mix-Thread wird beendet");
        }

        if let Some(abbruch) = self.abbruch.take() {
            // Kapazitaet 1: das einzige Signal passt immer
            let _ = abbruch.try_send(());
        }

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                tracing::warn!("stoppen() aus dem Mix-Thread aufgerufen, Join uebersprungen");
                return;
            }
            if thread.join().is_err() {
                tracing::error!("Mix-Thread ist abgestuerzt");
            }
            self.zustand.beendet();
        }
    }
}

impl Drop for MixScheduler {
    fn drop(&mut self) {
        self.stoppen();
    }
}

fn mix_schleife<F>(
    mut timer: MixTimer,
    abbruch: Receiver<()>,
    zustand: LoopStateHandle,
    mut handler: F,
) where
    F: FnMut(TickStatus),
{
    loop {
        match abbruch.recv_deadline(timer.expires_at()) {
            Err(RecvTimeoutError::Timeout) => {
                handler(TickStatus::Expired);
                if !zustand.laeuft() {
                    handler(TickStatus::Cancelled);
                    break;
                }
                timer.reschedule();
            }
            Ok(()) => {
                handler(TickStatus::Cancelled);
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Abbruch-Kanal geschlossen, Mix-Schleife endet");
                handler(TickStatus::Disconnected);
                break;
            }
        }
    }
    zustand.beendet();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
