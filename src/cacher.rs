//! The [Cacher]: a manager that deduplicates registrations by recipe identity.
//!
//! Equal recipes converge on the same counter, and therefore the same object, for as long as
//! any handle keeps that counter alive.  The dedup index is an ordered map from recipe to slot;
//! unloading an object keeps its index entry (a later retrieval of the same recipe still
//! deduplicates and simply rebuilds), while forgetting a counter erases the entry along with it.
use std::cell::RefCell;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::counter::{Counter, CounterProbe, FirmDrop, LazyDrop};
use crate::handle::{LazyHandle, LoadError, Station};
use crate::pool::{Pool, PoolConfig, PoolStats};
use crate::registry::{Entry, ListId, Registry};
use crate::traits::{Asset, Loader, Recipe};

struct CacherState<R: Recipe> {
    registry: Registry<R>,
    /// Recipe identity → slot.  Exactly one entry per live counter.
    index: BTreeMap<R, usize>,
}

struct CacherShared<R: Recipe + Ord, L> {
    loader: L,
    label: Option<String>,
    state: RefCell<CacherState<R>>,
}

impl<R: Recipe + Ord, L> CacherShared<R, L> {
    /// Erase a counter with no holders: unload what remains, drop the entry and its index key.
    fn forget(state: &mut CacherState<R>, slot: usize) -> (Option<Rc<R::Object>>, Entry<R>) {
        let object = state.registry.entry_mut(slot).counter.evict();
        state.registry.move_to_tail(slot, ListId::Unloaded);
        debug_assert_eq!(state.registry.entry(slot).list(), ListId::Unloaded);
        let entry = state.registry.remove(slot);
        let removed = state.index.remove(&entry.recipe);
        debug_assert_eq!(removed, Some(slot), "index entry should match its counter");
        (object, entry)
    }
}

impl<R: Recipe + Ord, L> Drop for CacherShared<R, L> {
    fn drop(&mut self) {
        let state = self.state.borrow();
        debug_assert!(
            state.registry.is_empty() && state.index.is_empty(),
            "cacher {:?} dropped with live counters",
            self.label
        );
    }
}

impl<R, L> Station<R::Object> for CacherShared<R, L>
where
    R: Recipe + Clone + Ord + 'static,
    L: Loader<R> + 'static,
{
    fn acquire(&self, slot: usize) -> Result<Rc<R::Object>, LoadError> {
        let recipe = {
            let mut state = self.state.borrow_mut();
            let entry = state.registry.entry_mut(slot);
            if let Some(object) = entry.counter.object() {
                if entry.counter.acquire_firm() {
                    state.registry.move_to_tail(slot, ListId::Used);
                }
                return Ok(object);
            }
            entry.recipe.clone()
        };

        let object = self
            .loader
            .load(&recipe)
            .map_err(|e| LoadError::Materialize(Box::new(e)))?;

        let mut state = self.state.borrow_mut();
        let entry = state.registry.entry_mut(slot);
        entry.counter.install(object.clone());
        entry.counter.acquire_firm();
        state.registry.move_to_tail(slot, ListId::Used);
        Ok(object)
    }

    fn retain_firm(&self, slot: usize) {
        let mut state = self.state.borrow_mut();
        let first = state.registry.entry_mut(slot).counter.acquire_firm();
        debug_assert!(!first, "retain_firm on an unused counter");
    }

    fn release_firm(&self, slot: usize) {
        let reclaimed = {
            let mut state = self.state.borrow_mut();
            match state.registry.entry_mut(slot).counter.release_firm() {
                FirmDrop::StillHeld => None,
                FirmDrop::Unloadable => {
                    state.registry.move_to_tail(slot, ListId::Cached);
                    None
                }
                FirmDrop::Forgettable => Some(Self::forget(&mut state, slot)),
            }
        };
        drop(reclaimed);
    }

    fn retain_lazy(&self, slot: usize) {
        self.state
            .borrow_mut()
            .registry
            .entry_mut(slot)
            .counter
            .acquire_lazy();
    }

    fn release_lazy(&self, slot: usize) {
        let reclaimed = {
            let mut state = self.state.borrow_mut();
            match state.registry.entry_mut(slot).counter.release_lazy() {
                LazyDrop::StillReferenced => None,
                LazyDrop::Forgettable => Some(Self::forget(&mut state, slot)),
            }
        };
        drop(reclaimed);
    }

    fn probe(&self, slot: usize) -> CounterProbe {
        self.state.borrow().registry.entry(slot).counter.probe()
    }

    fn station_addr(&self) -> usize {
        self as *const CacherShared<R, L> as *const () as usize
    }
}

/// The deduplicating pool: one counter per distinct recipe.
pub struct Cacher<R: Recipe + Ord, L = crate::traits::DirectLoader> {
    shared: Rc<CacherShared<R, L>>,
}

impl<R, L> Cacher<R, L>
where
    R: Recipe + Clone + Ord + 'static,
    L: Loader<R> + 'static,
{
    pub fn new(loader: L) -> Cacher<R, L> {
        Cacher::with_config(loader, PoolConfig::default())
    }

    pub fn with_config(loader: L, config: PoolConfig) -> Cacher<R, L> {
        Cacher {
            shared: Rc::new(CacherShared {
                loader,
                label: config.label,
                state: RefCell::new(CacherState {
                    registry: Registry::with_capacity(config.capacity),
                    index: BTreeMap::new(),
                }),
            }),
        }
    }

    /// A lazy handle for this recipe, reusing the existing counter when an equal recipe is
    /// already registered.
    pub fn retrieve_asset(&self, recipe: R) -> LazyHandle<R::Object> {
        let slot = {
            let mut state = self.shared.state.borrow_mut();
            let CacherState { registry, index } = &mut *state;
            match index.entry(recipe) {
                btree_map::Entry::Occupied(occupied) => *occupied.get(),
                btree_map::Entry::Vacant(vacant) => {
                    let slot = registry.insert(vacant.key().clone(), Counter::new());
                    vacant.insert(slot);
                    slot
                }
            }
        };
        LazyHandle::adopt(self.shared.clone(), slot)
    }

    /// [Cacher::retrieve_asset] from a bare kernel value.
    pub fn retrieve_asset_k(&self, kernel: R::Kernel) -> LazyHandle<R::Object>
    where
        R: From<R::Kernel>,
    {
        self.retrieve_asset(R::from(kernel))
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.borrow();
        PoolStats {
            unloaded: state.registry.list_len(ListId::Unloaded),
            cached: state.registry.list_len(ListId::Cached),
            used: state.registry.list_len(ListId::Used),
        }
    }

    /// Bytes held by all materialized objects (Used and Cached).
    pub fn footprint(&self) -> u64 {
        let state = self.shared.state.borrow();
        [ListId::Used, ListId::Cached]
            .into_iter()
            .flat_map(|list| state.registry.iter_list(list))
            .map(|slot| match state.registry.entry(slot).counter.object() {
                Some(object) => object.memory_cost(),
                None => panic!("materialized lists hold objects"),
            })
            .sum()
    }
}

impl<R, L> Pool for Cacher<R, L>
where
    R: Recipe + Clone + Ord + 'static,
    L: Loader<R> + 'static,
{
    fn clean(&self, budget: u64) -> u64 {
        let mut freed = 0u64;
        loop {
            if freed >= budget {
                break;
            }
            let (object, forgotten) = {
                let mut state = self.shared.state.borrow_mut();
                let slot = match state.registry.head(ListId::Cached) {
                    Some(slot) => slot,
                    None => break,
                };
                debug_assert!(state.registry.entry(slot).counter.is_cached());
                let object = match state.registry.entry_mut(slot).counter.evict() {
                    Some(object) => object,
                    None => panic!("cached entries hold an object"),
                };
                state.registry.move_to_tail(slot, ListId::Unloaded);
                // Unloading keeps the index entry; only an unreferenced counter is forgotten.
                let forgotten = if state.registry.entry(slot).counter.is_forgettable() {
                    Some(CacherShared::<R, L>::forget(&mut state, slot))
                } else {
                    None
                };
                (object, forgotten)
            };
            freed = freed.saturating_add(object.memory_cost());
            drop(object);
            drop(forgotten);
        }
        freed
    }
}

impl<R: Recipe + Ord, L> std::fmt::Debug for Cacher<R, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Cacher")
            .field("label", &self.shared.label)
            .field("recipes", &state.index.len())
            .field("unloaded", &state.registry.list_len(ListId::Unloaded))
            .field("cached", &state.registry.list_len(ListId::Cached))
            .field("used", &state.registry.list_len(ListId::Used))
            .finish()
    }
}
