//! Storage backends.
//!
//! [`Storage`] and [`AsyncStorage`] are the contracts; [`MemoryStorage`]
//! and (with the `persistent` feature) [`LocalStorage`] are the bundled
//! implementations.

mod memory;
mod options;
mod traits;

#[cfg(feature = "persistent")]
pub mod local;

pub use memory::MemoryStorage;
pub use options::StorageOptions;
pub use traits::{AsyncStorage, Blocking, Storage};

#[cfg(feature = "persistent")]
pub use local::{LocalConfig, LocalStorage};
