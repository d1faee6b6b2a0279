use serde_json::{Map, Value};

use crate::database::api::Database;
use crate::database::backend::BackendDisconnect;
use crate::database::error::{translate_exception, DatabaseResult};
use crate::database::location::Location;
use crate::database::snapshot::Priority;
use crate::database::task::complete;

/// Disconnect-scoped variants of the mutating operations.
///
/// Each call succeeds as soon as the backend has queued the mutation; it runs once the
/// connection to the store is lost. The result is `()` rather than a reference because
/// nothing has been written yet.
#[derive(Clone, Debug)]
pub struct OnDisconnect {
    database: Database,
}

impl OnDisconnect {
    pub(crate) fn new(database: Database) -> Self {
        Self { database }
    }

    fn handle(&self, location: &Location) -> DatabaseResult<BackendDisconnect> {
        let reference = self.database.resolve(location)?;
        reference
            .handle()
            .on_disconnect()
            .map_err(|err| translate_exception(&err))
    }

    pub async fn set(&self, location: impl Into<Location>, value: Value) -> DatabaseResult<()> {
        let handle = self.handle(&location.into())?;
        complete(|done| handle.set(value, done)).await
    }

    pub async fn set_with_priority(
        &self,
        location: impl Into<Location>,
        value: Value,
        priority: impl Into<Priority>,
    ) -> DatabaseResult<()> {
        let handle = self.handle(&location.into())?;
        let priority = priority.into().to_value();
        complete(|done| handle.set_with_priority(value, priority, done)).await
    }

    pub async fn set_priority(
        &self,
        location: impl Into<Location>,
        priority: impl Into<Priority>,
    ) -> DatabaseResult<()> {
        let handle = self.handle(&location.into())?;
        let priority = priority.into().to_value();
        complete(|done| handle.set_priority(priority, done)).await
    }

    pub async fn update(
        &self,
        location: impl Into<Location>,
        values: Map<String, Value>,
    ) -> DatabaseResult<()> {
        let handle = self.handle(&location.into())?;
        complete(|done| handle.update(values, done)).await
    }

    pub async fn remove(&self, location: impl Into<Location>) -> DatabaseResult<()> {
        let handle = self.handle(&location.into())?;
        complete(|done| handle.remove(done)).await
    }

    /// Drops every queued disconnect mutation at or below `location`.
    pub async fn cancel(&self, location: impl Into<Location>) -> DatabaseResult<()> {
        let handle = self.handle(&location.into())?;
        complete(|done| handle.cancel(done)).await
    }
}
