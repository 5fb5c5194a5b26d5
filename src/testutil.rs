//! Instrumented fixtures shared by the pool tests.
//!
//! `Blob` is a small named asset whose loader and drop glue report into a [Telemetry] record, so
//! tests can assert exactly how many times materialization and destruction happened.
use std::cell::Cell;
use std::rc::Rc;

use crate::traits::{Asset, Loader, Recipe};

#[derive(Debug, Default)]
pub struct Telemetry {
    pub built: Cell<usize>,
    pub dropped: Cell<usize>,
}

impl Telemetry {
    pub fn counts(&self) -> (usize, usize) {
        (self.built.get(), self.dropped.get())
    }
}

pub struct Blob {
    pub name: String,
    pub bytes: u64,
    stats: Rc<Telemetry>,
}

impl Asset for Blob {
    fn memory_cost(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        self.stats.dropped.set(self.stats.dropped.get() + 1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlobKernel {
    /// A named blob with the default 64-byte cost.
    Named(String),
    /// A named blob with an explicit cost.
    Sized(String, u64),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlobRecipe {
    pub kernel: BlobKernel,
}

impl Recipe for BlobRecipe {
    type Object = Blob;
    type Kernel = BlobKernel;

    fn kernel(&self) -> &BlobKernel {
        &self.kernel
    }
}

impl From<BlobKernel> for BlobRecipe {
    fn from(kernel: BlobKernel) -> BlobRecipe {
        BlobRecipe { kernel }
    }
}

pub fn named(name: &str) -> BlobRecipe {
    BlobRecipe {
        kernel: BlobKernel::Named(name.to_string()),
    }
}

pub fn sized(name: &str, bytes: u64) -> BlobRecipe {
    BlobRecipe {
        kernel: BlobKernel::Sized(name.to_string(), bytes),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("refused to load {0:?}")]
pub struct RefusedLoad(pub String);

/// Builds [Blob]s and records every construction; can be told to fail.
pub struct BlobLoader {
    pub stats: Rc<Telemetry>,
    pub fail: Cell<bool>,
}

impl BlobLoader {
    pub fn new() -> BlobLoader {
        BlobLoader {
            stats: Rc::new(Telemetry::default()),
            fail: Cell::new(false),
        }
    }
}

impl Loader<BlobRecipe> for BlobLoader {
    type Error = RefusedLoad;

    fn load(&self, recipe: &BlobRecipe) -> Result<Rc<Blob>, RefusedLoad> {
        let (name, bytes) = match recipe.kernel() {
            BlobKernel::Named(name) => (name.clone(), 64),
            BlobKernel::Sized(name, bytes) => (name.clone(), *bytes),
        };
        if self.fail.get() {
            return Err(RefusedLoad(name));
        }
        self.stats.built.set(self.stats.built.get() + 1);
        Ok(Rc::new(Blob {
            name,
            bytes,
            stats: self.stats.clone(),
        }))
    }
}
