#![allow(non_camel_case_types)]

//! `kvtx` layers Multi-Version Concurrency Control on top of a plain
//! key/value [`backend`]: every transaction reads a consistent snapshot,
//! writes are buffered until commit, and transactions nest arbitrarily
//! deep, merging into their immediate parent rather than the backend
//! directly. Only a Root's own commit ever touches the backend.
//!
//! ## Getting started
//!
//! ```rust
//! use kvtx::sync::Root;
//! use kvtx::backend::memory::MemoryBackend;
//!
//! let root = Root::new(MemoryBackend::new());
//! let setup = root.transaction();
//! setup.create("a".to_string(), 1).unwrap();
//! setup.commit(None).unwrap();
//!
//! let tx = root.transaction().create_nested().unwrap();
//! assert_eq!(tx.read(&"a".to_string()).unwrap(), Some(1));
//! tx.write("a".to_string(), 2).unwrap();
//! tx.commit(None).unwrap();
//!
//! let verify = root.transaction();
//! assert_eq!(verify.read(&"a".to_string()).unwrap(), Some(2));
//! ```

pub mod aio;
pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod sync;
