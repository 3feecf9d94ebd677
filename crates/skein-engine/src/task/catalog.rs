use std::sync::Arc;

use futures::future::BoxFuture;

use skein_core::error::Result;
use skein_core::status::CatalogCacheStatus;
use skein_core::traits::{CatalogClient, CatalogEntry, CatalogKey, CatalogMetadata, OutputReader};

/// Catalog that caches nothing. Lookups report the cache as disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCatalog;

impl CatalogClient for NoopCatalog {
    fn get(&self, _key: &CatalogKey) -> BoxFuture<'_, Result<CatalogEntry>> {
        Box::pin(async { Ok(CatalogEntry::disabled()) })
    }

    fn put(
        &self,
        _key: &CatalogKey,
        _reader: Arc<dyn OutputReader>,
        _metadata: CatalogMetadata,
    ) -> BoxFuture<'_, Result<CatalogCacheStatus>> {
        Box::pin(async { Ok(CatalogCacheStatus::Disabled) })
    }
}
