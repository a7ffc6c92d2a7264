//! Observer registry.
//!
//! Observers are held weakly: the device never keeps a client alive, and a
//! client that went away without unregistering is skipped and pruned on the
//! next notification.
//!
//! Entries are keyed by the observer's allocation address, so register and
//! unregister are O(1) amortized. Unregistering leaves a hole in the ordered
//! slot list; holes are compacted on notification or once they outnumber the
//! live entries. A held `Weak` keeps the allocation alive, so an address can
//! not be reused while its slot exists.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::error::DeviceError;
use crate::events::{DeviceEvent, DeviceObserver};
use crate::state::DeviceStatus;

type ObserverKey = usize;

fn key_of(observer: &Arc<dyn DeviceObserver>) -> ObserverKey {
    Arc::as_ptr(observer).cast::<()>() as usize
}

#[derive(Default)]
pub struct ObserverRegistry {
    /// Registration order; `None` marks an unregistered entry.
    slots: Vec<Option<Weak<dyn DeviceObserver>>>,
    index: HashMap<ObserverKey, usize>,
    holes: usize,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. Registering the same observer twice is a no-op.
    pub fn register(&mut self, observer: &Arc<dyn DeviceObserver>) -> Result<(), DeviceError> {
        if observer.interests().is_empty() {
            return Err(DeviceError::Argument(format!(
                "Observer '{}' handles no events",
                observer.name()
            )));
        }
        let key = key_of(observer);
        if self.index.contains_key(&key) {
            debug!(observer = observer.name(), "Already registered");
            return Ok(());
        }
        debug!(observer = observer.name(), "Observer registered");
        self.index.insert(key, self.slots.len());
        self.slots.push(Some(Arc::downgrade(observer)));
        Ok(())
    }

    /// Remove an observer; returns whether it was registered.
    pub fn unregister(&mut self, observer: &Arc<dyn DeviceObserver>) -> bool {
        let Some(slot) = self.index.remove(&key_of(observer)) else {
            return false;
        };
        self.slots[slot] = None;
        self.holes += 1;
        debug!(observer = observer.name(), "Observer unregistered");
        if self.holes * 2 > self.slots.len() {
            self.compact();
        }
        true
    }

    /// Drop holes and dead observers, keeping registration order.
    fn compact(&mut self) {
        self.slots
            .retain(|slot| slot.as_ref().is_some_and(|w| w.strong_count() > 0));
        self.index.clear();
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(weak) = slot {
                self.index.insert(weak.as_ptr().cast::<()>() as usize, i);
            }
        }
        self.holes = 0;
    }

    /// Live observers.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every interested observer in registration order.
    /// Returns how many observers were called.
    pub fn notify(&mut self, status: &DeviceStatus, event: &DeviceEvent) -> usize {
        self.compact();
        // Upgrade first so a callback can never observe a half-pruned list.
        let live: Vec<Arc<dyn DeviceObserver>> = self
            .slots
            .iter()
            .flatten()
            .filter_map(Weak::upgrade)
            .collect();

        let kind = event.kind();
        let mut delivered = 0;
        for observer in live {
            if !observer.interests().contains(kind) {
                continue;
            }
            trace!(observer = observer.name(), event = ?kind, "Dispatch");
            observer.on_event(status, event);
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventMask};
    use crate::protocol::Mode;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        mask: EventMask,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl DeviceObserver for Recorder {
        fn name(&self) -> &str {
            self.label
        }

        fn interests(&self) -> EventMask {
            self.mask
        }

        fn on_event(&self, _status: &DeviceStatus, event: &DeviceEvent) {
            self.log.lock().unwrap().push(format!("{}:{event}", self.label));
        }
    }

    fn recorder(
        label: &'static str,
        mask: EventMask,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn DeviceObserver> {
        Arc::new(Recorder {
            label,
            mask,
            log: log.clone(),
        })
    }

    #[test]
    fn test_rejects_observer_without_interests() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let err = registry
            .register(&recorder("mute", EventMask::EMPTY, &log))
            .unwrap_err();
        assert!(matches!(err, DeviceError::Argument(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_notifies_in_order_and_filters_by_interest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let a = recorder("a", EventMask::ALL, &log);
        let b = recorder("b", EventMask::of(&[EventKind::Pair]), &log);
        let c = recorder("c", EventMask::of(&[EventKind::SetMode]), &log);
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();
        registry.register(&c).unwrap();
        registry.register(&a).unwrap();

        let status = DeviceStatus::new("dev");
        assert_eq!(registry.notify(&status, &DeviceEvent::ModeSet(Mode::Usb)), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:mode usb", "c:mode usb"]);
    }

    #[test]
    fn test_unregister_and_dead_observers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let a = recorder("a", EventMask::ALL, &log);
        let b = recorder("b", EventMask::ALL, &log);
        registry.register(&a).unwrap();
        registry.register(&b).unwrap();

        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));

        drop(b);
        assert_eq!(registry.len(), 0);
        let status = DeviceStatus::new("dev");
        assert_eq!(registry.notify(&status, &DeviceEvent::Paired), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unregister_keeps_order_and_reregister_appends() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let a = recorder("a", EventMask::ALL, &log);
        let b = recorder("b", EventMask::ALL, &log);
        let c = recorder("c", EventMask::ALL, &log);
        let d = recorder("d", EventMask::ALL, &log);
        for o in [&a, &b, &c, &d] {
            registry.register(o).unwrap();
        }

        assert!(registry.unregister(&b));
        assert_eq!(registry.len(), 3);
        registry.register(&b).unwrap();
        // Removing two of four leaves holes but no compaction yet.
        assert!(registry.unregister(&c));

        let status = DeviceStatus::new("dev");
        assert_eq!(registry.notify(&status, &DeviceEvent::Paired), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:pair request accepted",
                "d:pair request accepted",
                "b:pair request accepted",
            ]
        );
    }

    #[test]
    fn test_register_unregister_churn_stays_bounded() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        let keep = recorder("keep", EventMask::ALL, &log);
        registry.register(&keep).unwrap();

        for _ in 0..1000 {
            let temp = recorder("temp", EventMask::ALL, &log);
            registry.register(&temp).unwrap();
            assert!(registry.unregister(&temp));
        }

        assert!(registry.slots.len() <= 3);
        assert_eq!(registry.index.len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
