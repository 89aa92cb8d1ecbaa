//! Konfigurations-Store mit Listener-Benachrichtigung
//!
//! Ein explizit besessenes Einstellungsobjekt statt eines prozessweiten
//! Singletons. Wer die Konfiguration braucht, bekommt eine Referenz (meist
//! `Arc<ConfigStore<T>>`) uebergeben.
//!
//! Listener werden synchron nach jedem `set`/`update` aufgerufen, und zwar
//! ausserhalb der internen Locks: ein Listener darf also selbst `get` aufrufen.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle eines registrierten Listeners (fuer `unregister_listener`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Thread-safer Einstellungs-Store
pub struct ConfigStore<T> {
    wert: RwLock<T>,
    listener: Mutex<Vec<(ListenerId, Listener<T>)>>,
    naechste_id: AtomicU64,
}

impl<T: Clone + Send + Sync> ConfigStore<T> {
    /// Erstellt einen Store mit Anfangswert
    pub fn new(wert: T) -> Self {
        Self {
            wert: RwLock::new(wert),
            listener: Mutex::new(Vec::new()),
            naechste_id: AtomicU64::new(1),
        }
    }

    /// Gibt eine Kopie der aktuellen Einstellungen zurueck
    pub fn get(&self) -> T {
        self.wert.read().clone()
    }

    /// Ersetzt die Einstellungen und benachrichtigt alle Listener
    pub fn set(&self, neu: T) {
        *self.wert.write() = neu.clone();
        self.benachrichtigen(&neu);
    }

    /// Aendert die Einstellungen in-place und benachrichtigt alle Listener
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let neu = {
            let mut wert = self.wert.write();
            f(&mut wert);
            wert.clone()
        };
        self.benachrichtigen(&neu);
    }

    /// Registriert einen Listener
    pub fn register_listener<F>(&self, f: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.naechste_id.fetch_add(1, Ordering::Relaxed));
        self.listener.lock().push((id, Arc::new(f)));
        id
    }

    /// Entfernt einen Listener. Gibt `false` zurueck wenn er unbekannt war.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listener = self.listener.lock();
        let vorher = listener.len();
        listener.retain(|(lid, _)| *lid != id);
        listener.len() != vorher
    }

    /// Anzahl registrierter Listener
    pub fn listener_anzahl(&self) -> usize {
        self.listener.lock().len()
    }

    fn benachrichtigen(&self, wert: &T) {
        // Snapshot der Listener, damit ein Listener sich selbst abmelden kann
        let listener: Vec<Listener<T>> = self
            .listener
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for l in listener {
            l(wert);
        }
    }
}

impl<T: Clone + Send + Sync + Default> Default for ConfigStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
