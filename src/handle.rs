//! The two handle flavors user code holds: [LazyHandle] and [FirmHandle].
//!
//! A lazy handle binds the identity of a pooled object without forcing it into memory; a firm
//! handle guarantees the object is materialized for as long as the handle lives, and dereferences
//! to it.  Both are cheap to clone and talk to their pool through a private, object-safe station
//! interface, so a handle can outlive knowledge of which pool implementation issued it.
//!
//! Handles compare, order and hash by *counter identity*: two handles are equal exactly when they
//! refer to the same registered entity, regardless of handle flavor or any projection applied.
//! There is no null handle; use `Option<LazyHandle<T>>` where optionality is needed.
use std::any::Any;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::counter::{CounterProbe, CounterState, ObjectState};

/// The pool-side surface a handle drives.
///
/// Implemented by every pool's shared state (and by projection adapters wrapping them).  `acquire`
/// materializes if needed and raises the firm count; `retain_firm` raises it for a counter that is
/// already in use, which is what handle cloning needs and all it is valid for.
pub(crate) trait Station<T: ?Sized> {
    fn acquire(&self, slot: usize) -> Result<Rc<T>, LoadError>;
    fn retain_firm(&self, slot: usize);
    fn release_firm(&self, slot: usize);
    fn retain_lazy(&self, slot: usize);
    fn release_lazy(&self, slot: usize);
    fn probe(&self, slot: usize) -> CounterProbe;
    /// Stable address of the issuing pool's shared state; the identity basis for handles.
    fn station_addr(&self) -> usize;
}

/// Identity of a registered entity: the issuing pool and the counter's slot within it.
///
/// The derived ordering is by identity, not by any property of the object; it exists so handles
/// can key ordered containers.  An id is meaningful only while some handle keeps its counter
/// alive; slots are recycled once a counter is erased, like any address-based identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterId {
    pool: usize,
    slot: usize,
}

/// Why an object could not be produced for a firm handle.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The loader failed; the counter was left untouched and unloaded.
    #[error("materialization failed: {0}")]
    Materialize(#[source] Box<dyn std::error::Error + 'static>),
    /// A projected handle's stored cast no longer applies to the materialized object.
    #[error("materialized object does not fit the handle's projected type")]
    Projection,
}

/// A handle that keeps an object's identity alive without keeping the object in memory.
///
/// Dropping the last handle of either flavor erases the underlying counter from its pool.
pub struct LazyHandle<T: ?Sized> {
    station: Rc<dyn Station<T>>,
    slot: usize,
}

impl<T: ?Sized> LazyHandle<T> {
    /// Bind a new lazy holder to `slot`.  Raises the lazy count.
    pub(crate) fn adopt(station: Rc<dyn Station<T>>, slot: usize) -> LazyHandle<T> {
        station.retain_lazy(slot);
        LazyHandle { station, slot }
    }

    /// Upgrade to a firm handle, materializing the object if it is not in memory.
    pub fn get_loaded(&self) -> Result<FirmHandle<T>, LoadError> {
        let object = self.station.acquire(self.slot)?;
        Ok(FirmHandle {
            station: self.station.clone(),
            slot: self.slot,
            object,
        })
    }

    pub fn counter_id(&self) -> CounterId {
        CounterId {
            pool: self.station.station_addr(),
            slot: self.slot,
        }
    }

    /// Whether the object is currently materialized (by other holders or the cache).
    pub fn is_loaded(&self) -> bool {
        self.station.probe(self.slot).loaded
    }

    pub fn counter_state(&self) -> CounterState {
        self.station.probe(self.slot).counter_state()
    }

    pub fn object_state(&self) -> ObjectState {
        self.station.probe(self.slot).object_state()
    }

    /// Re-type this handle, e.g. from a concrete object type to a base trait object.
    ///
    /// The projection is checked at compile time and is applied to the object on every future
    /// upgrade.  The counter is shared with the source handle, so identity is preserved.
    pub fn map<U, F>(&self, project: F) -> LazyHandle<U>
    where
        T: 'static,
        U: ?Sized + 'static,
        F: Fn(Rc<T>) -> Rc<U> + 'static,
    {
        let station: Rc<dyn Station<U>> = Rc::new(ProjectedStation {
            inner: self.station.clone(),
            project: Box::new(move |object| Ok(project(object))),
        });
        LazyHandle::adopt(station, self.slot)
    }
}

impl<T: ?Sized> Clone for LazyHandle<T> {
    fn clone(&self) -> LazyHandle<T> {
        LazyHandle::adopt(self.station.clone(), self.slot)
    }
}

impl<T: ?Sized> Drop for LazyHandle<T> {
    fn drop(&mut self) {
        self.station.release_lazy(self.slot);
    }
}

/// A handle that guarantees the object is materialized and dereferences to it.
///
/// While any firm handle exists its counter is in use, and [Pool::clean](crate::Pool::clean) will
/// never evict the backing object.
pub struct FirmHandle<T: ?Sized> {
    station: Rc<dyn Station<T>>,
    slot: usize,
    object: Rc<T>,
}

impl<T: ?Sized> FirmHandle<T> {
    /// Demote to a lazy handle without giving up this handle's guarantee.
    pub fn downgrade(&self) -> LazyHandle<T> {
        LazyHandle::adopt(self.station.clone(), self.slot)
    }

    pub fn counter_id(&self) -> CounterId {
        CounterId {
            pool: self.station.station_addr(),
            slot: self.slot,
        }
    }

    pub fn counter_state(&self) -> CounterState {
        self.station.probe(self.slot).counter_state()
    }

    pub fn object_state(&self) -> ObjectState {
        self.station.probe(self.slot).object_state()
    }

    /// Re-type the object pointer with a compile-time-checked projection, keeping the counter.
    ///
    /// This is how a handle over a concrete type becomes a handle over a base trait object:
    /// `handle.map(|object| -> Rc<dyn Base> { object })`.
    pub fn map<U, F>(self, project: F) -> FirmHandle<U>
    where
        T: 'static,
        U: ?Sized + 'static,
        F: Fn(Rc<T>) -> Rc<U> + 'static,
    {
        let object = project(self.object.clone());
        let station: Rc<dyn Station<U>> = Rc::new(ProjectedStation {
            inner: self.station.clone(),
            project: Box::new(move |object| Ok(project(object))),
        });
        // The new handle takes its own firm count; `self` gives one back when it drops below.
        station.retain_firm(self.slot);
        FirmHandle {
            station,
            slot: self.slot,
            object,
        }
    }

    /// Runtime-checked re-typing.  On refusal the original handle is returned untouched.
    pub fn try_map<U, F>(self, project: F) -> Result<FirmHandle<U>, FirmHandle<T>>
    where
        T: 'static,
        U: ?Sized + 'static,
        F: Fn(Rc<T>) -> Result<Rc<U>, Rc<T>> + 'static,
    {
        match project(self.object.clone()) {
            Ok(object) => {
                let station: Rc<dyn Station<U>> = Rc::new(ProjectedStation {
                    inner: self.station.clone(),
                    project: Box::new(move |object| {
                        project(object).map_err(|_| LoadError::Projection)
                    }),
                });
                station.retain_firm(self.slot);
                Ok(FirmHandle {
                    station,
                    slot: self.slot,
                    object,
                })
            }
            Err(_) => Err(self),
        }
    }

    /// Reinterpret the object pointer as `U` without any check.
    ///
    /// # Safety
    ///
    /// The object must actually be a `U` allocated as one (e.g. a handle previously erased from
    /// `FirmHandle<U>`).  Anything else is undefined behavior, exactly as a raw pointer cast
    /// would be.
    pub unsafe fn cast_unchecked<U>(self) -> FirmHandle<U>
    where
        T: 'static,
        U: Any,
    {
        unsafe fn reinterpret<T: ?Sized, U>(object: Rc<T>) -> Rc<U> {
            let raw = Rc::into_raw(object);
            unsafe { Rc::from_raw(raw as *const U) }
        }

        let object = unsafe { reinterpret::<T, U>(self.object.clone()) };
        let station: Rc<dyn Station<U>> = Rc::new(ProjectedStation {
            inner: self.station.clone(),
            project: Box::new(|object| Ok(unsafe { reinterpret::<T, U>(object) })),
        });
        station.retain_firm(self.slot);
        FirmHandle {
            station,
            slot: self.slot,
            object,
        }
    }
}

impl FirmHandle<dyn Any> {
    /// Checked downcast to a concrete type, in the manner of `Rc::downcast`.
    ///
    /// Reaching `FirmHandle<dyn Any>` from a custom asset trait object is a [FirmHandle::map]
    /// away, since every [Asset](crate::Asset) is `Any`.
    pub fn downcast<U: Any>(self) -> Result<FirmHandle<U>, FirmHandle<dyn Any>> {
        self.try_map(|object| object.downcast::<U>())
    }
}

impl<T: ?Sized> Clone for FirmHandle<T> {
    fn clone(&self) -> FirmHandle<T> {
        self.station.retain_firm(self.slot);
        FirmHandle {
            station: self.station.clone(),
            slot: self.slot,
            object: self.object.clone(),
        }
    }
}

impl<T: ?Sized> Drop for FirmHandle<T> {
    fn drop(&mut self) {
        self.station.release_firm(self.slot);
    }
}

impl<T: ?Sized> std::ops::Deref for FirmHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.object
    }
}

/// A station that forwards bookkeeping to the issuing pool and re-applies a stored projection on
/// every acquisition.  This is what keeps re-typed handles upgradable and demotable.
struct ProjectedStation<T: ?Sized, U: ?Sized> {
    inner: Rc<dyn Station<T>>,
    #[allow(clippy::type_complexity)]
    project: Box<dyn Fn(Rc<T>) -> Result<Rc<U>, LoadError>>,
}

impl<T: ?Sized, U: ?Sized> Station<U> for ProjectedStation<T, U> {
    fn acquire(&self, slot: usize) -> Result<Rc<U>, LoadError> {
        (self.project)(self.inner.acquire(slot)?)
    }

    fn retain_firm(&self, slot: usize) {
        self.inner.retain_firm(slot);
    }

    fn release_firm(&self, slot: usize) {
        self.inner.release_firm(slot);
    }

    fn retain_lazy(&self, slot: usize) {
        self.inner.retain_lazy(slot);
    }

    fn release_lazy(&self, slot: usize) {
        self.inner.release_lazy(slot);
    }

    fn probe(&self, slot: usize) -> CounterProbe {
        self.inner.probe(slot)
    }

    fn station_addr(&self) -> usize {
        self.inner.station_addr()
    }
}

// Identity-based comparisons.  Equality works across handle flavors and across projections; order
// and hash are defined per flavor so handles can live in ordered and hashed containers.

impl<T: ?Sized, U: ?Sized> PartialEq<LazyHandle<U>> for LazyHandle<T> {
    fn eq(&self, other: &LazyHandle<U>) -> bool {
        self.counter_id() == other.counter_id()
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<FirmHandle<U>> for LazyHandle<T> {
    fn eq(&self, other: &FirmHandle<U>) -> bool {
        self.counter_id() == other.counter_id()
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<FirmHandle<U>> for FirmHandle<T> {
    fn eq(&self, other: &FirmHandle<U>) -> bool {
        self.counter_id() == other.counter_id()
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<LazyHandle<U>> for FirmHandle<T> {
    fn eq(&self, other: &LazyHandle<U>) -> bool {
        self.counter_id() == other.counter_id()
    }
}

impl<T: ?Sized> Eq for LazyHandle<T> {}
impl<T: ?Sized> Eq for FirmHandle<T> {}

impl<T: ?Sized> PartialOrd for LazyHandle<T> {
    fn partial_cmp(&self, other: &LazyHandle<T>) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for LazyHandle<T> {
    fn cmp(&self, other: &LazyHandle<T>) -> std::cmp::Ordering {
        self.counter_id().cmp(&other.counter_id())
    }
}

impl<T: ?Sized> PartialOrd for FirmHandle<T> {
    fn partial_cmp(&self, other: &FirmHandle<T>) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for FirmHandle<T> {
    fn cmp(&self, other: &FirmHandle<T>) -> std::cmp::Ordering {
        self.counter_id().cmp(&other.counter_id())
    }
}

impl<T: ?Sized> Hash for LazyHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.counter_id().hash(state);
    }
}

impl<T: ?Sized> Hash for FirmHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.counter_id().hash(state);
    }
}

impl<T: ?Sized> std::fmt::Debug for LazyHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyHandle")
            .field("counter", &self.counter_id())
            .field("state", &self.counter_state())
            .finish()
    }
}

impl<T: ?Sized> std::fmt::Debug for FirmHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmHandle")
            .field("counter", &self.counter_id())
            .field("state", &self.counter_state())
            .finish()
    }
}
