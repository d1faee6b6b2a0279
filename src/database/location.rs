//! Declarative addresses of store nodes and their resolution into backend handles.

use std::fmt;
use std::sync::LazyLock;

use crate::database::backend::{Backend, BackendRef};
use crate::database::error::{location_error, DatabaseResult};
use crate::logger::Logger;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database-location"));

/// A live reference to a store node.
#[derive(Clone)]
pub struct Reference {
    handle: BackendRef,
}

impl Reference {
    pub(crate) fn new(handle: BackendRef) -> Self {
        Self { handle }
    }

    /// Absolute URL of the node.
    pub fn to_url(&self) -> String {
        self.handle.to_url()
    }

    /// Last path segment, `None` for the root.
    pub fn key(&self) -> Option<String> {
        self.handle.key()
    }

    pub fn is_root(&self) -> bool {
        self.handle.parent().is_none()
    }

    pub(crate) fn handle(&self) -> &BackendRef {
        &self.handle
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.to_url() == other.to_url()
    }
}

impl Eq for Reference {}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reference").field(&self.to_url()).finish()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// Where an operation applies, resolved only when the operation runs.
///
/// Every variant other than [`Location::Url`] and [`Location::Raw`] wraps a strictly smaller
/// expression, so resolution always terminates.
#[derive(Clone, Debug)]
pub enum Location {
    /// Node addressed by an absolute URL of the store.
    Url(String),
    /// Child (or descendant, for a `/` separated path) of another location.
    Child(String, Box<Location>),
    /// Parent of another location; fails for the root.
    Parent(Box<Location>),
    Root(Box<Location>),
    /// A fresh, time-ordered child key under another location. Each resolution mints a new
    /// key, so resolving the same expression twice addresses two different nodes.
    Push(Box<Location>),
    /// An already resolved reference.
    Raw(Reference),
}

impl Location {
    pub fn url(address: impl Into<String>) -> Self {
        Location::Url(address.into())
    }

    pub fn child(self, name: impl Into<String>) -> Self {
        Location::Child(name.into(), Box::new(self))
    }

    pub fn parent(self) -> Self {
        Location::Parent(Box::new(self))
    }

    pub fn root(self) -> Self {
        Location::Root(Box::new(self))
    }

    pub fn push(self) -> Self {
        Location::Push(Box::new(self))
    }
}

impl From<Reference> for Location {
    fn from(reference: Reference) -> Self {
        Location::Raw(reference)
    }
}

impl From<&Reference> for Location {
    fn from(reference: &Reference) -> Self {
        Location::Raw(reference.clone())
    }
}

impl From<&Location> for Location {
    fn from(location: &Location) -> Self {
        location.clone()
    }
}

pub fn from_url(address: impl Into<String>) -> Location {
    Location::url(address)
}

pub fn sub(name: impl Into<String>, of: Location) -> Location {
    of.child(name)
}

pub fn parent(of: Location) -> Location {
    of.parent()
}

pub fn root(of: Location) -> Location {
    of.root()
}

pub fn push(of: Location) -> Location {
    of.push()
}

pub fn location(reference: &Reference) -> Location {
    Location::from(reference)
}

/// Resolves `location` against `backend`, innermost expression first.
///
/// No backend call other than handle construction is made, so a failure here leaves the
/// store untouched.
pub fn resolve(backend: &dyn Backend, location: &Location) -> DatabaseResult<BackendRef> {
    let resolved = match location {
        Location::Url(address) => backend
            .reference_from_url(address)
            .map_err(|err| location_error(err.message())),
        Location::Child(name, of) => resolve(backend, of)?
            .child(name)
            .map_err(|err| location_error(err.message())),
        Location::Parent(of) => resolve(backend, of)?
            .parent()
            .ok_or_else(|| location_error("Root has no parent")),
        Location::Root(of) => Ok(resolve(backend, of)?.root()),
        Location::Push(of) => resolve(backend, of)?
            .push()
            .map_err(|err| location_error(err.message())),
        Location::Raw(reference) => Ok(reference.handle().clone()),
    };
    if let Err(err) = &resolved {
        LOGGER.debug(format!("failed to resolve {location:?}: {err}"));
    }
    resolved
}
