//! Change notifications emitted by the scheme manager

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use crate::models::Scheme;

/// Observer of registry changes
/// All methods default to no-ops; callbacks run after the change is complete
/// and never while the registry lock is held
pub trait SchemeListener<T>: Send + Sync {
    /// The resolved current scheme changed (only fired when notify = true)
    fn current_scheme_changed(&self, _old: Option<&T>, _new: Option<&T>) {}

    /// A single scheme was added or replaced
    fn scheme_added(&self, _scheme: &T) {}

    /// A single scheme was removed
    fn scheme_removed(&self, _scheme: &T) {}

    /// The collection was cleared or swapped by a bulk replace
    fn schemes_replaced(&self) {}
}

/// Owned description of a change, for channel delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemeEvent {
    CurrentChanged {
        old: Option<String>,
        new: Option<String>,
    },
    Added(String),
    Removed(String),
    Replaced,
}

/// Listener that forwards events over an mpsc channel
pub struct ChannelListener {
    tx: Mutex<Sender<SchemeEvent>>,
}

impl ChannelListener {
    pub fn new(tx: Sender<SchemeEvent>) -> Self {
        ChannelListener { tx: Mutex::new(tx) }
    }

    /// Shared listener ready for `SchemeManager::add_listener`
    pub fn shared(tx: Sender<SchemeEvent>) -> Arc<Self> {
        Arc::new(Self::new(tx))
    }

    fn send(&self, event: SchemeEvent) {
        if let Ok(tx) = self.tx.lock() {
            // Receiver gone means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

impl<T: Scheme> SchemeListener<T> for ChannelListener {
    fn current_scheme_changed(&self, old: Option<&T>, new: Option<&T>) {
        self.send(SchemeEvent::CurrentChanged {
            old: old.map(|s| s.name().to_string()),
            new: new.map(|s| s.name().to_string()),
        });
    }

    fn scheme_added(&self, scheme: &T) {
        self.send(SchemeEvent::Added(scheme.name().to_string()));
    }

    fn scheme_removed(&self, scheme: &T) {
        self.send(SchemeEvent::Removed(scheme.name().to_string()));
    }

    fn schemes_replaced(&self) {
        self.send(SchemeEvent::Replaced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColorScheme;
    use std::sync::mpsc;

    #[test]
    fn test_channel_listener_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let listener = ChannelListener::new(tx);
        let light = ColorScheme::new("Light");
        let dark = ColorScheme::new("Dark");

        SchemeListener::<ColorScheme>::scheme_added(&listener, &light);
        listener.current_scheme_changed(Some(&light), Some(&dark));
        SchemeListener::<ColorScheme>::schemes_replaced(&listener);

        assert_eq!(rx.recv().unwrap(), SchemeEvent::Added("Light".to_string()));
        assert_eq!(
            rx.recv().unwrap(),
            SchemeEvent::CurrentChanged {
                old: Some("Light".to_string()),
                new: Some("Dark".to_string()),
            }
        );
        assert_eq!(rx.recv().unwrap(), SchemeEvent::Replaced);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let listener = ChannelListener::new(tx);
        SchemeListener::<ColorScheme>::scheme_removed(&listener, &ColorScheme::new("x"));
    }
}
