//! Reference collaborator implementations backing the `StorageSink`
//! and `IndexHandle` boundaries, used by tests and demos in place of a
//! real disk/network sink or catalog database.

pub mod memory;
