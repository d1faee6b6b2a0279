use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};

use crate::database::api::Database;
use crate::database::backend::{Backend, InMemoryBackend, RestBackend};
use crate::logger::Logger;
use crate::platform::runtime::{default_scheduler, TaskScheduler};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database"));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// REST when a database URL is configured, in-memory otherwise.
    #[default]
    Auto,
    InMemory,
    Rest,
}

/// Connection settings, typically deserialized from the host application's configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Root URL of the database, e.g. `http://127.0.0.1:9000/?ns=demo`.
    pub database_url: Option<String>,
    /// ID token forwarded to the store as the `auth` parameter.
    pub auth_token: Option<String>,
    pub transport: Transport,
}

impl DatabaseOptions {
    pub fn rest(database_url: impl Into<String>) -> Self {
        Self {
            database_url: Some(database_url.into()),
            transport: Transport::Rest,
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Builds a [`Database`] for `options` on the default scheduler.
pub fn connect(options: &DatabaseOptions) -> Database {
    connect_with_scheduler(options, default_scheduler())
}

/// Selects the backend for `options`, falling back to the in-memory store when the REST
/// backend cannot be built.
pub fn connect_with_scheduler(
    options: &DatabaseOptions,
    scheduler: Arc<dyn TaskScheduler>,
) -> Database {
    let backend = select_backend(options, scheduler.clone());
    Database::with_scheduler(backend, scheduler)
}

fn select_backend(
    options: &DatabaseOptions,
    scheduler: Arc<dyn TaskScheduler>,
) -> Arc<dyn Backend> {
    if options.transport != Transport::InMemory {
        match &options.database_url {
            Some(url) => {
                match RestBackend::new(url, options.auth_token.clone(), scheduler.clone()) {
                    Ok(backend) => return Arc::new(backend),
                    Err(err) => {
                        LOGGER.warn(format!(
                            "Falling back to in-memory Realtime Database backend: {err}"
                        ));
                    }
                }
            }
            None if options.transport == Transport::Rest => {
                LOGGER.warn("REST transport requested without a database URL; using in-memory backend");
            }
            None => {}
        }
    }
    Arc::new(InMemoryBackend::with_scheduler(scheduler))
}
