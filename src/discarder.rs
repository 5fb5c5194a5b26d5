//! The [Discarder]: build on demand, drop the moment nothing firm remains.
//!
//! A discarder retains recipes like a [Manager](crate::Manager) but holds no cache at all: the
//! object is destroyed as soon as its last firm handle drops, and the next upgrade rebuilds it
//! from scratch.  Use it for objects whose memory is worth more than their construction time,
//! or as the conservative baseline before choosing a caching policy.  With nothing ever cached,
//! [Pool::clean] has nothing to do.
use std::cell::RefCell;
use std::rc::Rc;

use crate::counter::{Counter, CounterProbe, FirmDrop, LazyDrop};
use crate::handle::{LazyHandle, LoadError, Station};
use crate::pool::{Pool, PoolConfig, PoolStats};
use crate::registry::{Entry, ListId, Registry};
use crate::traits::{Asset, Loader, Recipe};

struct DiscarderShared<R: Recipe, L> {
    loader: L,
    label: Option<String>,
    state: RefCell<Registry<R>>,
}

impl<R: Recipe, L> DiscarderShared<R, L> {
    fn forget(state: &mut Registry<R>, slot: usize) -> (Option<Rc<R::Object>>, Entry<R>) {
        let object = state.entry_mut(slot).counter.evict();
        state.move_to_tail(slot, ListId::Unloaded);
        debug_assert_eq!(state.entry(slot).list(), ListId::Unloaded);
        let entry = state.remove(slot);
        (object, entry)
    }
}

impl<R: Recipe, L> Drop for DiscarderShared<R, L> {
    fn drop(&mut self) {
        debug_assert!(
            self.state.borrow().is_empty(),
            "discarder {:?} dropped with live counters",
            self.label
        );
    }
}

impl<R, L> Station<R::Object> for DiscarderShared<R, L>
where
    R: Recipe + Clone + 'static,
    L: Loader<R> + 'static,
{
    fn acquire(&self, slot: usize) -> Result<Rc<R::Object>, LoadError> {
        let recipe = {
            let mut state = self.state.borrow_mut();
            let entry = state.entry_mut(slot);
            if let Some(object) = entry.counter.object() {
                // Only reachable while other firm holders exist; no list move needed.
                let first = entry.counter.acquire_firm();
                debug_assert!(!first, "loaded discarder entries are always in use");
                return Ok(object);
            }
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
                FirmDrop::StillHeld => (None, None),
                FirmDrop::Unloadable => {
                    // No cache: unload right away, keep the recipe for the next upgrade.
                    let object = state.entry_mut(slot).counter.evict();
                    state.move_to_tail(slot, ListId::Unloaded);
                    (object, None)
                }
                FirmDrop::Forgettable => {
                    let (object, entry) = Self::forget(&mut state, slot);
                    (object, Some(entry))
                }
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
        self as *const DiscarderShared<R, L> as *const () as usize
    }
}

/// The cache-free pool: every upgrade cycle rebuilds, every release destroys.
pub struct Discarder<R: Recipe, L = crate::traits::DirectLoader> {
    shared: Rc<DiscarderShared<R, L>>,
}

impl<R, L> Discarder<R, L>
where
    R: Recipe + Clone + 'static,
    L: Loader<R> + 'static,
{
    pub fn new(loader: L) -> Discarder<R, L> {
        Discarder::with_config(loader, PoolConfig::default())
    }

    pub fn with_config(loader: L, config: PoolConfig) -> Discarder<R, L> {
        Discarder {
            shared: Rc::new(DiscarderShared {
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

    /// [Discarder::register_asset] from a bare kernel value.
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

    /// Bytes held by objects currently in use.
    pub fn footprint(&self) -> u64 {
        let state = self.shared.state.borrow();
        state
            .iter_list(ListId::Used)
            .map(|slot| match state.entry(slot).counter.object() {
                Some(object) => object.memory_cost(),
                None => panic!("in-use entries hold objects"),
            })
            .sum()
    }
}

impl<R, L> Pool for Discarder<R, L>
where
    R: Recipe + Clone + 'static,
    L: Loader<R> + 'static,
{
    /// Nothing is ever retained without a firm holder, so there is nothing to free.
    fn clean(&self, _budget: u64) -> u64 {
        debug_assert_eq!(self.stats().cached, 0);
        0
    }
}

impl<R: Recipe, L> std::fmt::Debug for Discarder<R, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Discarder")
            .field("label", &self.shared.label)
            .field("unloaded", &state.list_len(ListId::Unloaded))
            .field("used", &state.list_len(ListId::Used))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::ObjectState;
    use crate::testutil::{named, sized, BlobLoader, BlobRecipe, Telemetry};

    fn discarder() -> (Rc<Telemetry>, Discarder<BlobRecipe, BlobLoader>) {
        let loader = BlobLoader::new();
        let stats = loader.stats.clone();
        (stats, Discarder::new(loader))
    }

    #[test]
    fn every_upgrade_cycle_rebuilds() {
        let (stats, discarder) = discarder();
        let lazy = discarder.register_asset(named("tmp"));

        for round in 1..=3u32 {
            let firm = lazy.get_loaded().unwrap();
            assert_eq!(firm.name, "tmp");
            assert_eq!(stats.counts(), (round as usize, round as usize - 1));
            drop(firm);
            // Unloaded immediately; identity survives through the lazy handle.
            assert_eq!(lazy.object_state(), ObjectState::Unloaded);
            assert_eq!(stats.counts(), (round as usize, round as usize));
        }
    }

    #[test]
    fn overlapping_firm_holders_share_one_build() {
        let (stats, discarder) = discarder();
        let lazy = discarder.register_asset(sized("big", 512));

        let a = lazy.get_loaded().unwrap();
        let b = lazy.get_loaded().unwrap();
        assert_eq!(stats.counts(), (1, 0));
        assert_eq!(discarder.footprint(), 512);

        drop(a);
        assert!(lazy.is_loaded());
        drop(b);
        assert_eq!(discarder.footprint(), 0);
        assert_eq!(stats.counts(), (1, 1));
    }

    #[test]
    fn nothing_is_ever_cleanable() {
        let (_stats, discarder) = discarder();
        let lazy = discarder.register_asset(named("tmp"));
        drop(lazy.get_loaded().unwrap());
        assert_eq!(discarder.clean_all(), 0);
        assert_eq!(
            discarder.stats(),
            PoolStats {
                unloaded: 1,
                cached: 0,
                used: 0
            }
        );
    }

    #[test]
    fn failed_rebuild_after_discard_rolls_back_to_unloaded() {
        let (stats, discarder) = discarder();
        let lazy = discarder.register_asset(named("flaky"));

        // One clean build-and-discard cycle first, so the failure hits a rebuild.
        drop(lazy.get_loaded().unwrap());
        assert_eq!(stats.counts(), (1, 1));

        discarder.shared.loader.fail.set(true);
        let err = lazy.get_loaded().unwrap_err();
        assert!(matches!(err, LoadError::Materialize(_)));
        assert_eq!(lazy.object_state(), ObjectState::Unloaded);
        assert_eq!(
            discarder.stats(),
            PoolStats {
                unloaded: 1,
                cached: 0,
                used: 0
            }
        );
        assert_eq!(stats.counts(), (1, 1));

        // The recipe is intact; the next upgrade rebuilds as if the failure never happened.
        discarder.shared.loader.fail.set(false);
        let firm = lazy.get_loaded().unwrap();
        assert_eq!(firm.name, "flaky");
        drop(firm);
        assert_eq!(stats.counts(), (2, 2));
    }

    #[test]
    fn dropping_the_identity_erases_the_counter() {
        let (stats, discarder) = discarder();
        let lazy = discarder.register_asset(named("tmp"));
        let firm = lazy.get_loaded().unwrap();
        drop(lazy);
        drop(firm);
        assert_eq!(discarder.stats().total(), 0);
        assert_eq!(stats.counts(), (1, 1));
    }
}
