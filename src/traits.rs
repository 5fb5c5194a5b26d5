//! The contracts a pool consumes: [Asset], [Recipe] and [Loader].
//!
//! A [Recipe] describes how to build an object without building it: it names the object type and
//! carries a *kernel*, a user-defined enum whose variants are the admissible construction inputs.
//! A [Loader] turns a recipe into a heap-allocated object; pools invoke it at materialization time
//! and drop the returned `Rc` to unload.  An [Asset] is anything that can report how much memory it
//! holds while alive, which is what budgeted eviction runs on.
use std::any::Any;
use std::rc::Rc;

/// An object that can live in a pool.
///
/// `memory_cost` is an estimate of the bytes held while the object is alive; `clean` budgets are
/// accounted against it.  The `Any` supertrait is what allows checked downcasts on firm handles,
/// so trait-object assets get it transitively (`trait Texture: Asset` is enough).
///
/// Implementations must not call back into the owning pool from `memory_cost`.
pub trait Asset: Any {
    /// Estimated number of bytes held until this object is dropped.
    fn memory_cost(&self) -> u64;
}

/// A description of an object that has not necessarily been built yet.
///
/// The kernel is a tagged union of construction inputs, typically an enum over things like a file
/// path, a parsed descriptor, or raw bytes.  Recipes handed to a [Manager](crate::Manager) must be
/// `Clone` (materialization can happen repeatedly); recipes handed to a [Cacher](crate::Cacher)
/// must additionally be `Ord` and are treated as immutable once keyed.
pub trait Recipe {
    /// The object this recipe builds.  May be a trait object type.
    type Object: ?Sized + Asset;
    /// The tagged union of construction inputs.
    type Kernel;

    fn kernel(&self) -> &Self::Kernel;

    /// Relative cost hint for building this object (e.g. decode time or file size).
    ///
    /// Reserved for load-ordering policies; the shipped pools do not read it.
    fn load_cost(&self) -> u64 {
        1
    }
}

/// Builds objects from recipes.
///
/// This is the pool's construction collaborator: each materialization calls [Loader::load] once
/// and each unload drops the `Rc` it returned.  A loader producing a concrete type behind a
/// trait-object `Recipe::Object` performs the unsizing itself (`Rc<Concrete>` coerces to
/// `Rc<dyn Base>` in return position), which is how the compiler checks the subtype relation.
///
/// Loaders may load *other* assets from the same pool while running; they must not touch the
/// counter they are currently materializing.
pub trait Loader<R: Recipe> {
    type Error: std::error::Error + 'static;

    fn load(&self, recipe: &R) -> Result<Rc<R::Object>, Self::Error>;
}

/// Construction of a sized object directly from a kernel, used by [DirectLoader].
pub trait FromKernel<K>: Sized {
    type Error: std::error::Error + 'static;

    fn from_kernel(kernel: &K) -> Result<Self, Self::Error>;
}

/// The default loader: builds `R::Object` in place via [FromKernel], no indirection.
///
/// Use a custom [Loader] when the constructed type differs from the exposed one (trait-object
/// assets) or when construction needs state the kernel does not carry.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectLoader;

impl<R> Loader<R> for DirectLoader
where
    R: Recipe,
    R::Object: FromKernel<R::Kernel>,
{
    type Error = <R::Object as FromKernel<R::Kernel>>::Error;

    fn load(&self, recipe: &R) -> Result<Rc<R::Object>, Self::Error> {
        Ok(Rc::new(R::Object::from_kernel(recipe.kernel())?))
    }
}
