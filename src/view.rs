//! Firm references to data *inside* a pooled object.
//!
//! A [ViewHandle] points at a part of an object (a field, an element, a borrowed sub-structure)
//! while participating in the owner's firm count, so the whole object stays materialized for as
//! long as the view lives.  It is created from a [FirmHandle] by picking the part out of a shared
//! borrow of the object.
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use crate::handle::{CounterId, FirmHandle};

/// A firm handle to a part of a pooled object.
///
/// Keeps the owning [FirmHandle] alive, which keeps the object's counter in use; dereferences to
/// the part.  Unlike whole-object handles, views compare by the *part's* address: two views are
/// equal when they expose the same data, not merely the same counter.
pub struct ViewHandle<T: ?Sized, M: ?Sized> {
    owner: FirmHandle<T>,
    part: NonNull<M>,
}

impl<T: ?Sized> FirmHandle<T> {
    /// Narrow this handle to a part of the object.
    ///
    /// The handle moves into the view; clone first to keep a whole-object handle as well.
    pub fn view<M: ?Sized>(self, pick: impl FnOnce(&T) -> &M) -> ViewHandle<T, M> {
        let part = NonNull::from(pick(&self));
        ViewHandle { owner: self, part }
    }
}

impl<T: ?Sized, M: ?Sized> ViewHandle<T, M> {
    /// Narrow further, e.g. from a struct field to one of its own fields.
    pub fn map<N: ?Sized>(self, pick: impl FnOnce(&M) -> &N) -> ViewHandle<T, N> {
        let part = NonNull::from(pick(&self));
        ViewHandle {
            owner: self.owner,
            part,
        }
    }

    /// A whole-object handle sharing this view's counter.
    pub fn owner(&self) -> FirmHandle<T> {
        self.owner.clone()
    }

    pub fn counter_id(&self) -> CounterId {
        self.owner.counter_id()
    }
}

impl<T: ?Sized, M: ?Sized> std::ops::Deref for ViewHandle<T, M> {
    type Target = M;

    fn deref(&self) -> &M {
        // The part borrows from the owner's heap allocation, which `owner` keeps alive and which
        // never moves; pooled objects are only ever exposed through shared references.
        unsafe { self.part.as_ref() }
    }
}

impl<T: ?Sized, M: ?Sized> Clone for ViewHandle<T, M> {
    fn clone(&self) -> ViewHandle<T, M> {
        ViewHandle {
            owner: self.owner.clone(),
            part: self.part,
        }
    }
}

impl<T: ?Sized, U: ?Sized, M: ?Sized, N: ?Sized> PartialEq<ViewHandle<U, N>>
    for ViewHandle<T, M>
{
    fn eq(&self, other: &ViewHandle<U, N>) -> bool {
        std::ptr::addr_eq(self.part.as_ptr(), other.part.as_ptr())
    }
}

impl<T: ?Sized, M: ?Sized> Eq for ViewHandle<T, M> {}

impl<T: ?Sized, M: ?Sized> Hash for ViewHandle<T, M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.part.as_ptr() as *const () as usize).hash(state);
    }
}

impl<T: ?Sized, M: ?Sized> std::fmt::Debug for ViewHandle<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewHandle")
            .field("counter", &self.counter_id())
            .field("part", &self.part.as_ptr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::standalone::make_standalone;
    use crate::traits::Asset;

    struct Mesh {
        name: String,
        vertices: Vec<[f32; 3]>,
    }

    impl Asset for Mesh {
        fn memory_cost(&self) -> u64 {
            (self.name.len() + self.vertices.len() * 12) as u64
        }
    }

    fn mesh() -> Mesh {
        Mesh {
            name: "tri".to_string(),
            vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    #[test]
    fn views_deref_to_the_part() {
        let firm = make_standalone(mesh());
        let name = firm.clone().view(|m| &m.name);
        assert_eq!(&*name, "tri");
        assert_eq!(name.counter_id(), firm.counter_id());
    }

    #[test]
    fn views_keep_the_object_in_use() {
        let firm = make_standalone(mesh());
        let verts = firm.clone().view(|m| &m.vertices);
        drop(firm);
        // The view alone keeps the whole mesh alive.
        assert_eq!(verts.len(), 3);
        assert_eq!(verts.owner().name, "tri");
    }

    #[test]
    fn narrowing_and_equality_follow_the_part() {
        let firm = make_standalone(mesh());
        let first = firm.clone().view(|m| &m.vertices).map(|v| &v[0]);
        let again = firm.clone().view(|m| &m.vertices[0]);
        let name = firm.clone().view(|m| &m.name);
        assert_eq!(first, again);
        assert_eq!(first[1], 0.0);
        assert!(name != again.clone().map(|v| &v[0]));
    }
}
