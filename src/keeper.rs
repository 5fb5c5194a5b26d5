//! The [Keeper]: load once, keep until entirely unreferenced.
//!
//! A keeper materializes the object as part of [Keeper::new_asset] and never retains the recipe,
//! so it can never rebuild: the object simply stays in memory until every handle, firm or lazy,
//! has been dropped, at which point object and counter are discarded together.  There is nothing
//! a keeper can evict on request, so [Pool::clean] always reports zero.
use std::cell::RefCell;
use std::rc::Rc;

use crate::counter::{Counter, CounterProbe, FirmDrop, LazyDrop, ObjectState};
use crate::handle::{LazyHandle, LoadError, Station};
use crate::pool::{Pool, PoolConfig, PoolStats};
use crate::traits::{Asset, Loader, Recipe};

enum KeeperSlot<T: ?Sized> {
    Vacant { next_free: Option<usize> },
    Occupied(Counter<T>),
}

struct KeeperState<T: ?Sized> {
    slots: Vec<KeeperSlot<T>>,
    free_head: Option<usize>,
    live: usize,
}

impl<T: ?Sized> KeeperState<T> {
    fn counter(&self, slot: usize) -> &Counter<T> {
        match &self.slots[slot] {
            KeeperSlot::Occupied(counter) => counter,
            KeeperSlot::Vacant { .. } => panic!("slot should be occupied"),
        }
    }

    fn counter_mut(&mut self, slot: usize) -> &mut Counter<T> {
        match &mut self.slots[slot] {
            KeeperSlot::Occupied(counter) => counter,
            KeeperSlot::Vacant { .. } => panic!("slot should be occupied"),
        }
    }

    fn insert(&mut self, counter: Counter<T>) -> usize {
        self.live += 1;
        let slot = match self.free_head {
            Some(slot) => {
                self.free_head = match self.slots[slot] {
                    KeeperSlot::Vacant { next_free } => next_free,
                    KeeperSlot::Occupied(_) => panic!("free list points at an occupied slot"),
                };
                slot
            }
            None => {
                self.slots.push(KeeperSlot::Vacant { next_free: None });
                self.slots.len() - 1
            }
        };
        self.slots[slot] = KeeperSlot::Occupied(counter);
        slot
    }

    fn remove(&mut self, slot: usize) -> Counter<T> {
        let mut old = KeeperSlot::Vacant {
            next_free: self.free_head,
        };
        std::mem::swap(&mut old, &mut self.slots[slot]);
        self.free_head = Some(slot);
        self.live -= 1;
        match old {
            KeeperSlot::Occupied(counter) => counter,
            KeeperSlot::Vacant { .. } => panic!("slot should have been occupied"),
        }
    }
}

struct KeeperShared<R: Recipe, L> {
    loader: L,
    label: Option<String>,
    state: RefCell<KeeperState<R::Object>>,
}

impl<R: Recipe, L> Drop for KeeperShared<R, L> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.state.borrow().live,
            0,
            "keeper {:?} dropped with live counters",
            self.label
        );
    }
}

impl<R, L> Station<R::Object> for KeeperShared<R, L>
where
    R: Recipe + 'static,
    L: Loader<R> + 'static,
{
    fn acquire(&self, slot: usize) -> Result<Rc<R::Object>, LoadError> {
        let mut state = self.state.borrow_mut();
        let counter = state.counter_mut(slot);
        let object = match counter.object() {
            Some(object) => object,
            None => panic!("keeper objects live for the counter's lifetime"),
        };
        counter.acquire_firm();
        Ok(object)
    }

    fn retain_firm(&self, slot: usize) {
        self.state.borrow_mut().counter_mut(slot).acquire_firm();
    }

    fn release_firm(&self, slot: usize) {
        let reclaimed = {
            let mut state = self.state.borrow_mut();
            match state.counter_mut(slot).release_firm() {
                FirmDrop::StillHeld | FirmDrop::Unloadable => None,
                FirmDrop::Forgettable => Some(state.remove(slot)),
            }
        };
        // The object's destructor runs here, after the state borrow is gone.
        drop(reclaimed);
    }

    fn retain_lazy(&self, slot: usize) {
        self.state.borrow_mut().counter_mut(slot).acquire_lazy();
    }

    fn release_lazy(&self, slot: usize) {
        let reclaimed = {
            let mut state = self.state.borrow_mut();
            match state.counter_mut(slot).release_lazy() {
                LazyDrop::StillReferenced => None,
                LazyDrop::Forgettable => Some(state.remove(slot)),
            }
        };
        drop(reclaimed);
    }

    fn probe(&self, slot: usize) -> CounterProbe {
        self.state.borrow().counter(slot).probe()
    }

    fn station_addr(&self) -> usize {
        self as *const KeeperShared<R, L> as *const () as usize
    }
}

/// The load-once pool: materializes on registration, discards when unreferenced.
pub struct Keeper<R: Recipe, L = crate::traits::DirectLoader> {
    shared: Rc<KeeperShared<R, L>>,
}

impl<R, L> Keeper<R, L>
where
    R: Recipe + 'static,
    L: Loader<R> + 'static,
{
    pub fn new(loader: L) -> Keeper<R, L> {
        Keeper::with_config(loader, PoolConfig::default())
    }

    pub fn with_config(loader: L, config: PoolConfig) -> Keeper<R, L> {
        Keeper {
            shared: Rc::new(KeeperShared {
                loader,
                label: config.label,
                state: RefCell::new(KeeperState {
                    slots: Vec::with_capacity(config.capacity),
                    free_head: None,
                    live: 0,
                }),
            }),
        }
    }

    /// Build the object now and return a lazy handle bound to it.
    ///
    /// The recipe is only read during this call; the keeper does not retain it.
    pub fn new_asset(&self, recipe: &R) -> Result<LazyHandle<R::Object>, LoadError> {
        let object = self
            .shared
            .loader
            .load(recipe)
            .map_err(|e| LoadError::Materialize(Box::new(e)))?;
        let slot = self
            .shared
            .state
            .borrow_mut()
            .insert(Counter::with_object(object));
        Ok(LazyHandle::adopt(self.shared.clone(), slot))
    }

    /// [Keeper::new_asset] from a bare kernel value.
    pub fn new_asset_k(&self, kernel: R::Kernel) -> Result<LazyHandle<R::Object>, LoadError>
    where
        R: From<R::Kernel>,
    {
        self.new_asset(&R::from(kernel))
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.borrow();
        let mut stats = PoolStats::default();
        for slot in &state.slots {
            if let KeeperSlot::Occupied(counter) = slot {
                match counter.object_state() {
                    ObjectState::Used => stats.used += 1,
                    ObjectState::Cached => stats.cached += 1,
                    ObjectState::Unloaded => stats.unloaded += 1,
                }
            }
        }
        stats
    }

    /// Bytes held by all live objects.
    pub fn footprint(&self) -> u64 {
        let state = self.shared.state.borrow();
        state
            .slots
            .iter()
            .filter_map(|slot| match slot {
                KeeperSlot::Occupied(counter) => counter.object(),
                KeeperSlot::Vacant { .. } => None,
            })
            .map(|object| object.memory_cost())
            .sum()
    }
}

impl<R, L> Pool for Keeper<R, L>
where
    R: Recipe + 'static,
    L: Loader<R> + 'static,
{
    /// A keeper has nothing independently collectable; always reports zero.
    fn clean(&self, _budget: u64) -> u64 {
        0
    }
}

impl<R: Recipe, L> std::fmt::Debug for Keeper<R, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keeper")
            .field("label", &self.shared.label)
            .field("live", &self.shared.state.borrow().live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{CounterState, ObjectState};
    use crate::testutil::{named, BlobKernel, BlobLoader, BlobRecipe};

    fn keeper() -> (Rc<crate::testutil::Telemetry>, Keeper<BlobRecipe, BlobLoader>) {
        let loader = BlobLoader::new();
        let stats = loader.stats.clone();
        (stats, Keeper::new(loader))
    }

    #[test]
    fn single_asset_builds_once_and_dies_with_its_handles() {
        let (stats, keeper) = keeper();
        let lazy = keeper.new_asset(&named("A")).unwrap();
        assert_eq!(stats.counts(), (1, 0));
        assert!(lazy.is_loaded());

        {
            let firm = lazy.get_loaded().unwrap();
            assert_eq!(firm.name, "A");
            assert_eq!(firm.object_state(), ObjectState::Used);
        }

        // The firm holder is gone, but the keeper holds on while identity survives.
        assert_eq!(stats.counts(), (1, 0));
        assert_eq!(lazy.counter_state(), CounterState::Unloadable);

        drop(lazy);
        assert_eq!(stats.counts(), (1, 1));
        assert_eq!(keeper.stats().total(), 0);
    }

    #[test]
    fn reupgrading_never_reconstructs_and_the_address_is_stable() {
        let (stats, keeper) = keeper();
        let lazy = keeper.new_asset(&named("A")).unwrap();

        let first = lazy.get_loaded().unwrap();
        let addr = &*first as *const _;
        drop(first);

        let second = lazy.get_loaded().unwrap();
        assert!(std::ptr::eq(&*second as *const _, addr));
        assert_eq!(stats.counts(), (1, 0));
    }

    #[test]
    fn clean_frees_nothing() {
        let (_stats, keeper) = keeper();
        let lazy = keeper.new_asset(&named("A")).unwrap();
        drop(lazy.get_loaded().unwrap());

        assert_eq!(keeper.clean_all(), 0);
        assert!(lazy.is_loaded());
        assert_eq!(keeper.footprint(), 64);
    }

    #[test]
    fn each_registration_is_a_distinct_counter() {
        let (stats, keeper) = keeper();
        let a = keeper.new_asset(&named("A")).unwrap();
        let b = keeper.new_asset(&named("A")).unwrap();
        assert_ne!(a, b);
        assert_eq!(stats.counts(), (2, 0));
        assert_eq!(keeper.stats().total(), 2);
    }

    #[test]
    fn load_failure_surfaces_and_registers_nothing() {
        let (stats, keeper) = keeper();
        keeper.shared.loader.fail.set(true);
        let err = keeper.new_asset(&named("broken")).unwrap_err();
        assert!(matches!(err, LoadError::Materialize(_)));
        assert_eq!(stats.counts(), (0, 0));
        assert_eq!(keeper.stats().total(), 0);

        keeper.shared.loader.fail.set(false);
        let ok = keeper.new_asset_k(BlobKernel::Named("fine".to_string())).unwrap();
        assert_eq!(ok.get_loaded().unwrap().name, "fine");
    }

    #[test]
    fn slots_are_recycled_after_forget() {
        let (stats, keeper) = keeper();
        let first = keeper.new_asset(&named("A")).unwrap();
        drop(first);
        let second = keeper.new_asset(&named("B")).unwrap();
        assert_eq!(keeper.stats().total(), 1);
        assert_eq!(second.get_loaded().unwrap().name, "B");
        assert_eq!(stats.counts(), (2, 1));
    }
}
