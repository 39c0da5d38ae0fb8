//! Storage abstraction over the outbound request log.
//!
//! The worker and queue only see `RequestStore`. Production code adapts
//! `beacon_core::storage::Storage`; tests use the in-memory `mock` module to
//! inject read and removal failures.

use std::{future::Future, pin::Pin};

use beacon_core::{error::Result, storage::Storage};

/// Request log operations needed by the delivery pipeline.
pub trait RequestStore: Send + Sync + 'static {
    /// Returns a snapshot of queued requests, oldest first.
    fn connections(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>>;

    /// Removes the first queued request equal to `request`.
    ///
    /// Returns whether a request was removed.
    fn remove_connection<'a>(
        &'a self,
        request: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Appends a request at the tail.
    fn add_connection<'a>(
        &'a self,
        request: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Returns true when nothing is queued.
    fn is_empty_connections(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Drops every queued request and pending event.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Verifies the backing store is usable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// `RequestStore` backed by the SQLite `CONNECTIONS` log.
#[derive(Debug, Clone)]
pub struct PersistentRequestStore {
    storage: Storage,
}

impl PersistentRequestStore {
    /// Creates a store adapter over `storage`.
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Returns the wrapped storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl RequestStore for PersistentRequestStore {
    fn connections(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        Box::pin(self.storage.connections.read_all())
    }

    fn remove_connection<'a>(
        &'a self,
        request: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(self.storage.connections.remove_first_match(request))
    }

    fn add_connection<'a>(
        &'a self,
        request: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.storage.connections.append(request))
    }

    fn is_empty_connections(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(self.storage.connections.is_empty())
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.storage.clear_all())
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.storage.health_check())
    }
}

pub mod mock {
    //! In-memory request store for delivery tests.
    //!
    //! Keeps requests in a `Vec` and supports one-shot injected failures on
    //! reads and removals.

    use std::{future::Future, pin::Pin, sync::Arc};

    use beacon_core::error::{CoreError, Result};
    use tokio::sync::RwLock;

    use super::RequestStore;

    /// Mock request store for testing delivery logic without a database.
    #[derive(Debug, Clone, Default)]
    pub struct MockRequestStore {
        entries: Arc<RwLock<Vec<String>>>,
        removed: Arc<RwLock<Vec<String>>>,
        read_error: Arc<RwLock<Option<String>>>,
        remove_error: Arc<RwLock<Option<String>>>,
    }

    impl MockRequestStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a mock store holding `requests` in order.
        pub fn with_requests<I, S>(requests: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let entries: Vec<String> = requests.into_iter().map(Into::into).collect();
            Self { entries: Arc::new(RwLock::new(entries)), ..Self::default() }
        }

        /// Fails the next `connections` call with `error`.
        pub async fn inject_read_error(&self, error: impl Into<String>) {
            *self.read_error.write().await = Some(error.into());
        }

        /// Fails the next `remove_connection` call with `error`.
        pub async fn inject_remove_error(&self, error: impl Into<String>) {
            *self.remove_error.write().await = Some(error.into());
        }

        /// Returns the currently queued requests.
        pub async fn snapshot(&self) -> Vec<String> {
            self.entries.read().await.clone()
        }

        /// Returns removed requests in removal order.
        pub async fn removed(&self) -> Vec<String> {
            self.removed.read().await.clone()
        }
    }

    impl RequestStore for MockRequestStore {
        fn connections(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
            Box::pin(async move {
                if let Some(error) = self.read_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }
                Ok(self.entries.read().await.clone())
            })
        }

        fn remove_connection<'a>(
            &'a self,
            request: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
            Box::pin(async move {
                if let Some(error) = self.remove_error.write().await.take() {
                    return Err(CoreError::Database(error));
                }

                let mut entries = self.entries.write().await;
                let Some(position) = entries.iter().position(|entry| entry == request) else {
                    return Ok(false);
                };
                let removed = entries.remove(position);
                drop(entries);

                self.removed.write().await.push(removed);
                Ok(true)
            })
        }

        fn add_connection<'a>(
            &'a self,
            request: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                if !request.is_empty() {
                    self.entries.write().await.push(request.to_string());
                }
                Ok(())
            })
        }

        fn is_empty_connections(&self) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
            Box::pin(async move { Ok(self.entries.read().await.is_empty()) })
        }

        fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.entries.write().await.clear();
                Ok(())
            })
        }

        fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }
}
