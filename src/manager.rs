//! The [Manager]: deferred materialization with budgeted, oldest-first eviction.
//!
//! Registration stores the recipe and nothing else; the object is built on the first upgrade to a
//! firm handle and rebuilt on demand after eviction.  Counters move between the three lifecycle
//! lists as their counts change: into Used on the first firm acquisition, onto the tail of Cached
//! when the last firm handle drops, back to Unloaded when evicted.  [Pool::clean] walks the
//! Cached list from its head, which is always the entry that has gone unused the longest.
use std::cell::RefCell;
use std::rc::Rc;

use crate::counter::{Counter, CounterProbe, FirmDrop, LazyDrop};
use crate::handle::{LazyHandle, LoadError, Station};
use crate::pool::{Pool, PoolConfig, PoolStats};
use crate::registry::{Entry, ListId, Registry};
use crate::traits::{Asset, Loader, Recipe};

struct ManagerShared<R: Recipe, L> {
    loader: L,
    label: Option<String>,
    state: RefCell<Registry<R>>,
}

impl<R: Recipe, L> ManagerShared<R, L> {
    /// Erase a counter with no holders of either kind: unload whatever is still materialized,
    /// park the entry in Unloaded, then remove it.  Returns what must be dropped outside the
    /// state borrow (object destructors are user code).
    fn forget(state: &mut Registry<R>, slot: usize) -> (Option<Rc<R::Object>>, Entry<R>) {
        let object = state.entry_mut(slot).counter.evict();
        state.move_to_tail(slot, ListId::Unloaded);
        debug_assert_eq!(state.entry(slot).list(), ListId::Unloaded);
        let entry = state.remove(slot);
        (object, entry)
    }

    /// Shared clean loop: unload the oldest Cached entry per round until the budget is met.
    fn clean_registry(&self, budget: u64) -> u64 {
        let mut freed = 0u64;
        loop {
            if freed >= budget {
                break;
            }
            let (object, forgotten) = {
                let mut state = self.state.borrow_mut();
                let slot = match state.head(ListId::Cached) {
                    Some(slot) => slot,
                    None => break,
                };
                debug_assert!(state.entry(slot).counter.is_cached());
                let object = match state.entry_mut(slot).counter.evict() {
                    Some(object) => object,
                    None => panic!("cached entries hold an object"),
                };
                state.move_to_tail(slot, ListId::Unloaded);
                // A cached entry nobody lazily retains is dead once unloaded.
                let forgotten = if state.entry(slot).counter.is_forgettable() {
                    Some(Self::forget(&mut state, slot))
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

impl<R: Recipe, L> Drop for ManagerShared<R, L> {
    fn drop(&mut self) {
        debug_assert!(
            self.state.borrow().is_empty(),
            "manager {:?} dropped with live counters",
            self.label
        );
    }
}

impl<R, L> Station<R::Object> for ManagerShared<R, L>
where
    R: Recipe + Clone + 'static,
    L: Loader<R> + 'static,
{
    fn acquire(&self, slot: usize) -> Result<Rc<R::Object>, LoadError> {
        let recipe = {
            let mut state = self.state.borrow_mut();
            let entry = state.entry_mut(slot);
            if let Some(object) = entry.counter.object() {
                if entry.counter.acquire_firm() {
                    state.move_to_tail(slot, ListId::Used);
                }
                return Ok(object);
            }
            // Materialize outside the borrow: the loader may register or upgrade *other* assets.
            entry.recipe.clone()
        };

        let object = self
            .loader
            .load(&recipe)
            .map_err(|e| LoadError::Materialize(Box::new(e)))?;

        let mut state = self.state.borrow_mut();
        let entry = state.entry_mut(slot);
        entry.counter.install(object.clone());
        entry.counter.acquire_firm();
        state.move_to_tail(slot, ListId::Used);
        Ok(object)
    }

    fn retain_firm(&self, slot: usize) {
        let mut state = self.state.borrow_mut();
        let first = state.entry_mut(slot).counter.acquire_firm();
        debug_assert!(!first, "retain_firm on an unused counter");
    }

    fn release_firm(&self, slot: usize) {
        let reclaimed = {
            let mut state = self.state.borrow_mut();
            match state.entry_mut(slot).counter.release_firm() {
                FirmDrop::StillHeld => None,
                FirmDrop::Unloadable => {
                    state.move_to_tail(slot, ListId::Cached);
                    None
                }
                FirmDrop::Forgettable => Some(Self::forget(&mut state, slot)),
            }
        };
        drop(reclaimed);
    }

    fn retain_lazy(&self, slot: usize) {
        self.state.borrow_mut().entry_mut(slot).counter.acquire_lazy();
    }

    fn release_lazy(&self, slot: usize) {
        let reclaimed = {
            let mut state = self.state.borrow_mut();
            match state.entry_mut(slot).counter.release_lazy() {
                LazyDrop::StillReferenced => None,
                LazyDrop::Forgettable => Some(Self::forget(&mut state, slot)),
            }
        };
        drop(reclaimed);
    }

    fn probe(&self, slot: usize) -> CounterProbe {
        self.state.borrow().entry(slot).counter.probe()
    }

    fn station_addr(&self) -> usize {
        self as *const ManagerShared<R, L> as *const () as usize
    }
}

/// The reconstruct-on-demand pool: recipes in, objects built and rebuilt as handles require.
pub struct Manager<R: Recipe, L = crate::traits::DirectLoader> {
    shared: Rc<ManagerShared<R, L>>,
}

impl<R, L> Manager<R, L>
where
    R: Recipe + Clone + 'static,
    L: Loader<R> + 'static,
{
    pub fn new(loader: L) -> Manager<R, L> {
        Manager::with_config(loader, PoolConfig::default())
    }

    pub fn with_config(loader: L, config: PoolConfig) -> Manager<R, L> {
        Manager {
            shared: Rc::new(ManagerShared {
                loader,
                label: config.label,
                state: RefCell::new(Registry::with_capacity(config.capacity)),
            }),
        }
    }

    /// Retain the recipe and hand back a lazy handle; nothing is built yet.
    pub fn register_asset(&self, recipe: R) -> LazyHandle<R::Object> {
        let slot = self
            .shared
            .state
            .borrow_mut()
            .insert(recipe, Counter::new());
        LazyHandle::adopt(self.shared.clone(), slot)
    }

    /// [Manager::register_asset] from a bare kernel value.
    pub fn register_asset_k(&self, kernel: R::Kernel) -> LazyHandle<R::Object>
    where
        R: From<R::Kernel>,
    {
        self.register_asset(R::from(kernel))
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.borrow();
        PoolStats {
            unloaded: state.list_len(ListId::Unloaded),
            cached: state.list_len(ListId::Cached),
            used: state.list_len(ListId::Used),
        }
    }

    /// Bytes held by all materialized objects (Used and Cached).
    pub fn footprint(&self) -> u64 {
        let state = self.shared.state.borrow();
        [ListId::Used, ListId::Cached]
            .into_iter()
            .flat_map(|list| state.iter_list(list))
            .map(|slot| match state.entry(slot).counter.object() {
                Some(object) => object.memory_cost(),
                None => panic!("materialized lists hold objects"),
            })
            .sum()
    }
}

impl<R, L> Pool for Manager<R, L>
where
    R: Recipe + Clone + 'static,
    L: Loader<R> + 'static,
{
    fn clean(&self, budget: u64) -> u64 {
        self.shared.clean_registry(budget)
    }
}

impl<R: Recipe, L> std::fmt::Debug for Manager<R, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Manager")
            .field("label", &self.shared.label)
            .field("unloaded", &state.list_len(ListId::Unloaded))
            .field("cached", &state.list_len(ListId::Cached))
            .field("used", &state.list_len(ListId::Used))
            .finish()
    }
}
