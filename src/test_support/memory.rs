use std::sync::Arc;

use crate::database::{Database, InMemoryBackend, Location};

/// A database over a fresh in-memory store; the backend handle allows inspecting and
/// scripting the store.
pub fn memory_database() -> (InMemoryBackend, Database) {
    let backend = InMemoryBackend::new();
    (backend.clone(), Database::new(Arc::new(backend)))
}

/// Location of `path` below the default in-memory root.
pub fn at(path: &str) -> Location {
    Location::url("memory://default/").child(path)
}
