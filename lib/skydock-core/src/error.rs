use crate::key::NamingError;
use crate::runtime::RuntimeError;
use crate::store::StoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Naming contract violation: {0}")]
    Naming(#[from] NamingError),

    #[error("Store {op} failed for {key}: {source}")]
    Store {
        op: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Workload runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn store(op: &'static str, key: &str, source: StoreError) -> Self {
        CoreError::Store {
            op,
            key: key.to_string(),
            source,
        }
    }

    /// Fatal errors abort the daemon; everything else is logged and the
    /// affected operation is dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Naming(_))
    }
}
