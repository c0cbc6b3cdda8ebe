//! # fastcrud - Generic CRUD endpoints over pluggable storage
//!
//! fastcrud turns a serde model into a full set of create, read, update,
//! patch and delete operations, and (with the `http` feature) mounts them
//! as REST routes. Where the records live is decided by a storage backend
//! chosen at construction time.
//!
//! ## Core Concepts
//!
//! - **Model**: a caller type implementing [`CrudModel`]
//! - **Record**: a model value plus `uid`, `created_on` and `modify_on`
//! - **Storage**: a backend implementing [`Storage`] (blocking) or [`AsyncStorage`]
//! - **Dispatcher**: validates, forwards to the backend, and iterates bulk calls
//!
//! ## Usage
//!
//! ```
//! use fastcrud::{Dispatcher, Document, Filter, MemoryStorage, Record};
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let crud = Dispatcher::blocking(MemoryStorage::<Document>::new());
//! crud.start().await?;
//!
//! let note = crud.create(Record::new(Document::new().with("tag", "x"))).await?;
//! let found = crud.get_many(&Filter::eq("tag", "x")).await?;
//! assert_eq!(found[0].uid, note.uid);
//!
//! crud.stop().await?;
//! # Ok::<(), fastcrud::CrudError>(())
//! # }).unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `persistent` (default): [`LocalStorage`], a file-backed backend
//! - `http` (default): the axum router in [`http`]
//! - `server`: the `fastcrud-server` binary

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod model;
pub mod storage;

#[cfg(feature = "http")]
pub mod http;

// Re-export primary types at crate root for convenience
pub use dispatcher::Dispatcher;
pub use error::{CrudError, CrudResult, ValidationError};
pub use filter::{Filter, FilterOp};
pub use model::{CrudModel, Document, Patch, Record, RecordId};
pub use storage::{AsyncStorage, Blocking, MemoryStorage, Storage, StorageOptions};

#[cfg(feature = "persistent")]
pub use storage::{LocalConfig, LocalStorage};
