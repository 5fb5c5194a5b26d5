//! Policy-driven lifecycle management for heavy in-memory objects.
//!
//! Some objects, such as decoded textures, parsed documents, or compiled shader programs, are expensive
//! both to build and to keep around.  Code that works with them usually wants two different kinds
//! of reference at different times: "I will need this eventually, keep track of it" and "I am
//! using this right now, it must be in memory".  A plain `Rc` cannot express the difference, and
//! a plain map-shaped cache cannot tell a dropped reference from a dormant one.  This crate
//! separates the two intents with a dual reference count per object and two handle flavors over
//! it:
//!
//! - A [LazyHandle] binds the object's *identity* without forcing it into memory.  Holding one
//!   guarantees that upgrading later will find the same logical object, not that any memory is
//!   spent on it meanwhile.
//! - A [FirmHandle] guarantees the object is materialized for as long as the handle lives, and
//!   dereferences to it.  Every lazy handle upgrades with [LazyHandle::get_loaded]; every firm
//!   handle demotes with [FirmHandle::downgrade].
//!
//! Objects are described by [Recipe]s (a kernel of construction inputs plus hints), built by a
//! [Loader], and owned by one of four pools differing in policy:
//!
//! - [Keeper]: builds immediately on [Keeper::new_asset] and keeps the object until every handle
//!   is gone.  Nothing to evict, nothing rebuilt.
//! - [Manager]: retains the recipe from [Manager::register_asset], builds on first upgrade,
//!   unloads on request and rebuilds on the next upgrade.
//! - [Cacher]: a manager that deduplicates by recipe identity, so equal recipes converge on one
//!   object while anything still refers to it.
//! - [Discarder]: a manager with no cache at all; the object dies with its last firm handle and
//!   every upgrade cycle rebuilds.
//!
//! Every pool exposes [Pool::clean], a budgeted eviction that unloads objects that are
//! materialized but not firmly held, oldest first, until the requested number of bytes (by each
//! object's [Asset::memory_cost]) is freed.  Cleaning never invalidates handles.
//!
//! For objects that should merely *look* pooled, [make_standalone] wraps any value in the same
//! handle machinery with no pool behind it, and [ViewHandle] narrows a firm handle to data inside
//! the object while keeping the whole object alive.
//!
//! Pools and handles are single-threaded by design (`Rc`/`RefCell` underneath): all loading and
//! eviction happens synchronously on the calling thread, and none of these types are `Send`.
mod cacher;
mod counter;
mod discarder;
mod handle;
mod keeper;
mod manager;
mod pool;
mod registry;
mod standalone;
mod traits;
mod view;

#[cfg(test)]
pub(crate) mod testutil;

pub use cacher::*;
pub use counter::{CounterState, ObjectState};
pub use discarder::*;
pub use handle::{CounterId, FirmHandle, LazyHandle, LoadError};
pub use keeper::*;
pub use manager::*;
pub use pool::*;
pub use standalone::*;
pub use traits::*;
pub use view::*;
