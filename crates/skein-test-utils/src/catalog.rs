use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use skein_core::error::{Result, SkeinError};
use skein_core::status::CatalogCacheStatus;
use skein_core::traits::{CatalogClient, CatalogEntry, CatalogKey, CatalogMetadata, OutputReader};
use skein_storage::InMemoryCatalog;

/// In-memory catalog that counts calls and can be switched into failure modes.
#[derive(Default)]
pub struct MockCatalog {
    inner: InMemoryCatalog,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lookup fails with a backend error.
    pub fn failing_gets(self) -> Self {
        self.fail_gets.store(true, Ordering::SeqCst);
        self
    }

    /// Every write fails with a backend error.
    pub fn failing_puts(self) -> Self {
        self.fail_puts.store(true, Ordering::SeqCst);
        self
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl CatalogClient for MockCatalog {
    fn get(&self, key: &CatalogKey) -> BoxFuture<'_, Result<CatalogEntry>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Box::pin(async { Err(SkeinError::Catalog("catalog unavailable".into())) });
        }
        self.inner.get(key)
    }

    fn put(
        &self,
        key: &CatalogKey,
        reader: Arc<dyn OutputReader>,
        metadata: CatalogMetadata,
    ) -> BoxFuture<'_, Result<CatalogCacheStatus>> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Box::pin(async { Err(SkeinError::Catalog("catalog unavailable".into())) });
        }
        self.inner.put(key, reader, metadata)
    }
}
