//! Counters that own their object directly, with no pool behind them.
//!
//! [make_standalone] wraps an externally constructed object in the same handle machinery the
//! pools use, so code downstream of a pool can accept handles without caring whether the object
//! is pool-managed.  The counter is its own one-slot station: the object is permanently
//! materialized, and counter and object are freed together when the last handle drops.
use std::cell::RefCell;
use std::rc::Rc;

use crate::counter::{Counter, CounterProbe};
use crate::handle::{FirmHandle, LazyHandle, LoadError, Station};

struct StandaloneStation<T: ?Sized> {
    counter: RefCell<Counter<T>>,
}

impl<T: ?Sized> Station<T> for StandaloneStation<T> {
    fn acquire(&self, _slot: usize) -> Result<Rc<T>, LoadError> {
        let mut counter = self.counter.borrow_mut();
        let object = match counter.object() {
            Some(object) => object,
            None => panic!("standalone objects live for the counter's lifetime"),
        };
        counter.acquire_firm();
        Ok(object)
    }

    fn retain_firm(&self, _slot: usize) {
        self.counter.borrow_mut().acquire_firm();
    }

    fn release_firm(&self, _slot: usize) {
        // The object is embedded; nothing to unload.  When the last handle drops, the station's
        // own Rc frees counter and object together.
        self.counter.borrow_mut().release_firm();
    }

    fn retain_lazy(&self, _slot: usize) {
        self.counter.borrow_mut().acquire_lazy();
    }

    fn release_lazy(&self, _slot: usize) {
        self.counter.borrow_mut().release_lazy();
    }

    fn probe(&self, _slot: usize) -> CounterProbe {
        self.counter.borrow().probe()
    }

    fn station_addr(&self) -> usize {
        self as *const StandaloneStation<T> as *const () as usize
    }
}

/// Wrap an object in a standalone counter and return a firm handle to it.
///
/// The handle behaves exactly like one issued by a pool, except that the object can never be
/// unloaded: lazy demotions always upgrade back without construction.
pub fn make_standalone<T: 'static>(object: T) -> FirmHandle<T> {
    make_standalone_unsized(Rc::new(object))
}

/// [make_standalone] for objects that are already behind an `Rc`, including trait objects.
pub fn make_standalone_unsized<T: ?Sized + 'static>(object: Rc<T>) -> FirmHandle<T> {
    let station = Rc::new(StandaloneStation {
        counter: RefCell::new(Counter::with_object(object)),
    });
    let lazy = LazyHandle::adopt(station, 0);
    lazy.get_loaded()
        .unwrap_or_else(|_| unreachable!("standalone acquisition cannot fail"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{CounterState, ObjectState};
    use crate::traits::Asset;
    use std::cell::Cell;

    struct Tracked {
        dropped: Rc<Cell<bool>>,
    }

    impl Asset for Tracked {
        fn memory_cost(&self) -> u64 {
            64
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    #[test]
    fn standalone_objects_live_with_their_handles() {
        let dropped = Rc::new(Cell::new(false));
        let firm = make_standalone(Tracked {
            dropped: dropped.clone(),
        });
        assert_eq!(firm.object_state(), ObjectState::Used);

        let lazy = firm.downgrade();
        drop(firm);
        assert!(!dropped.get());
        assert_eq!(lazy.counter_state(), CounterState::Unloadable);
        assert!(lazy.is_loaded());

        // Upgrading never constructs; the embedded object comes straight back.
        let again = lazy.get_loaded().unwrap();
        assert_eq!(again.memory_cost(), 64);

        drop(again);
        drop(lazy);
        assert!(dropped.get());
    }

    #[test]
    fn standalone_handles_have_distinct_identities() {
        let a = make_standalone(Tracked {
            dropped: Rc::new(Cell::new(false)),
        });
        let b = make_standalone(Tracked {
            dropped: Rc::new(Cell::new(false)),
        });
        assert_ne!(a.counter_id(), b.counter_id());
        assert_eq!(a, a.clone());
    }

    #[test]
    fn trait_object_standalone() {
        let object: Rc<dyn Asset> = Rc::new(Tracked {
            dropped: Rc::new(Cell::new(false)),
        });
        let firm = make_standalone_unsized(object);
        assert_eq!(firm.memory_cost(), 64);
    }
}
