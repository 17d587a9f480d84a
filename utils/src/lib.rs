//! Shared filesystem utilities for warden.
//!
//! - **`atomic_write`**: create-only file persistence (temp + no-clobber rename)

pub mod atomic_write;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, ParentDirSyncPolicy, atomic_write_new_with_options,
};
