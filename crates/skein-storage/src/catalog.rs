use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use tracing::debug;

use skein_core::error::{Result, SkeinError};
use skein_core::status::CatalogCacheStatus;
use skein_core::traits::{CatalogClient, CatalogEntry, CatalogKey, CatalogMetadata, OutputReader};
use skein_core::types::LiteralMap;

struct CachedOutputs {
    outputs: LiteralMap,
    metadata: CatalogMetadata,
}

/// Catalog kept in process memory, keyed by a digest of the task identity,
/// cache version, interface and input values.
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<String, CachedOutputs>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Provenance of the entry stored under `key`, if any.
    pub async fn metadata(&self, key: &CatalogKey) -> Result<Option<CatalogMetadata>> {
        let digest = digest_key(key).await?;
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&digest)
            .map(|c| c.metadata.clone()))
    }
}

async fn digest_key(key: &CatalogKey) -> Result<String> {
    let inputs = key.input_reader.get().await?;
    let mut hasher = Sha256::new();
    hasher.update(key.identifier.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(key.cache_version.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(&key.typed_interface)?);
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(&inputs)?);
    Ok(hex::encode(hasher.finalize()))
}

impl CatalogClient for InMemoryCatalog {
    fn get(&self, key: &CatalogKey) -> BoxFuture<'_, Result<CatalogEntry>> {
        let key = key.clone();
        Box::pin(async move {
            let digest = digest_key(&key).await?;
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(&digest) {
                Some(cached) => Ok(CatalogEntry::hit(cached.outputs.clone())),
                None => Err(SkeinError::CatalogNotFound(key.identifier.to_string())),
            }
        })
    }

    fn put(
        &self,
        key: &CatalogKey,
        reader: Arc<dyn OutputReader>,
        metadata: CatalogMetadata,
    ) -> BoxFuture<'_, Result<CatalogCacheStatus>> {
        let key = key.clone();
        Box::pin(async move {
            let digest = digest_key(&key).await?;
            let outputs = reader.read().await?;
            debug!(task = %key.identifier, digest = %digest, "Caching task outputs");
            self.entries
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(digest, CachedOutputs { outputs, metadata });
            Ok(CatalogCacheStatus::Populated)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::InMemoryOutputReader;
    use skein_core::traits::InputReader;
    use skein_core::types::{DataReference, Identifier, Literal, TypedInterface};

    struct FixedInputs(LiteralMap);

    impl InputReader for FixedInputs {
        fn inputs_path(&self) -> DataReference {
            DataReference::new("mem://fixed/inputs")
        }

        fn get(&self) -> BoxFuture<'_, Result<LiteralMap>> {
            let inputs = self.0.clone();
            Box::pin(async move { Ok(inputs) })
        }
    }

    fn key(x: i64, version: &str) -> CatalogKey {
        let mut inputs = LiteralMap::new();
        inputs.insert("x".into(), Literal::integer(x));
        CatalogKey {
            identifier: Identifier::task("square", "1"),
            cache_version: version.to_string(),
            typed_interface: TypedInterface::default(),
            input_reader: Arc::new(FixedInputs(inputs)),
        }
    }

    fn outputs() -> LiteralMap {
        let mut m = LiteralMap::new();
        m.insert("y".into(), Literal::integer(9));
        m
    }

    #[tokio::test]
    async fn test_miss_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.get(&key(3, "v1")).await.unwrap_err();
        assert!(err.is_catalog_not_found());
    }

    #[tokio::test]
    async fn test_put_then_hit() {
        let catalog = InMemoryCatalog::new();
        let status = catalog
            .put(
                &key(3, "v1"),
                Arc::new(InMemoryOutputReader::new(outputs())),
                CatalogMetadata::default(),
            )
            .await
            .unwrap();
        assert_eq!(status, CatalogCacheStatus::Populated);

        let entry = catalog.get(&key(3, "v1")).await.unwrap();
        assert_eq!(entry.status, CatalogCacheStatus::Hit);
        assert_eq!(entry.outputs, Some(outputs()));
    }

    #[tokio::test]
    async fn test_key_includes_inputs_and_version() {
        let catalog = InMemoryCatalog::new();
        catalog
            .put(
                &key(3, "v1"),
                Arc::new(InMemoryOutputReader::new(outputs())),
                CatalogMetadata::default(),
            )
            .await
            .unwrap();

        assert!(catalog.get(&key(4, "v1")).await.is_err());
        assert!(catalog.get(&key(3, "v2")).await.is_err());
        assert_eq!(catalog.len(), 1);
    }
}
