use std::sync::Arc;

use tracing::{debug, error, info};

use skein_core::error::{codes, ExecutionError, Result};
use skein_core::node::TaskTemplate;
use skein_core::status::CatalogCacheStatus;
use skein_core::traits::{
    CatalogClient, CatalogKey, CatalogMetadata, InputReader, OutputReader, OutputWriter,
    PluginProperties,
};
use skein_storage::InMemoryOutputReader;

use crate::metrics::EngineMetrics;

/// Result of the pre-execution catalog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Cached outputs were committed; the task must not run.
    Hit,
    /// Run the task. Carries the status to record.
    Miss(CatalogCacheStatus),
}

/// Result of post-execution output validation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValidation {
    pub error: Option<ExecutionError>,
    pub cache_status: Option<CatalogCacheStatus>,
}

impl OutputValidation {
    fn ok(cache_status: Option<CatalogCacheStatus>) -> Self {
        Self {
            error: None,
            cache_status,
        }
    }

    fn failed(error: ExecutionError) -> Self {
        Self {
            error: Some(error),
            cache_status: None,
        }
    }
}

/// Memoization gate wrapped around task execution.
pub struct CatalogGate {
    catalog: Arc<dyn CatalogClient>,
    metrics: Arc<EngineMetrics>,
    max_error_message_length: usize,
}

impl CatalogGate {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        metrics: Arc<EngineMetrics>,
        max_error_message_length: usize,
    ) -> Self {
        Self {
            catalog,
            metrics,
            max_error_message_length,
        }
    }

    /// Look up previous outputs for a discoverable task. Catalog failures
    /// other than a miss are logged and the task runs normally.
    pub async fn check_catalog_cache(
        &self,
        template: &TaskTemplate,
        input_reader: Arc<dyn InputReader>,
        output_writer: &dyn OutputWriter,
    ) -> Result<CacheLookup> {
        if !template.metadata.discoverable {
            return Ok(CacheLookup::Miss(CatalogCacheStatus::Disabled));
        }

        let key = CatalogKey::for_task(template, input_reader);
        let entry = match self.catalog.get(&key).await {
            Ok(entry) => entry,
            Err(e) if e.is_catalog_not_found() => {
                self.metrics.record_catalog_miss();
                info!(task = %template.id, "Artifact not found in catalog, executing task");
                return Ok(CacheLookup::Miss(CatalogCacheStatus::Miss));
            }
            Err(e) => {
                self.metrics.record_catalog_get_failure();
                error!(task = %template.id, error = %e, "Catalog lookup failed, executing task");
                return Ok(CacheLookup::Miss(CatalogCacheStatus::LookupFailure));
            }
        };

        if entry.status != CatalogCacheStatus::Hit {
            debug!(task = %template.id, status = ?entry.status, "Catalog returned no outputs");
            return Ok(CacheLookup::Miss(entry.status));
        }

        self.metrics.record_catalog_hit();
        if template.interface.outputs_declared() {
            let outputs = entry.outputs.unwrap_or_default();
            output_writer
                .put(Arc::new(InMemoryOutputReader::new(outputs)))
                .await?;
        }
        info!(task = %template.id, "Serving task outputs from catalog");
        Ok(CacheLookup::Hit)
    }

    /// Check what the task produced, commit the outputs and add them to the
    /// catalog. Catalog write failures never fail the task.
    pub async fn validate_output_and_cache_add(
        &self,
        template: &TaskTemplate,
        properties: PluginProperties,
        input_reader: Arc<dyn InputReader>,
        reader: Option<Arc<dyn OutputReader>>,
        output_writer: &dyn OutputWriter,
        metadata: CatalogMetadata,
    ) -> Result<OutputValidation> {
        let outputs_declared = template.interface.outputs_declared();

        let reader = match reader {
            Some(reader) => reader,
            None if outputs_declared => {
                return Ok(OutputValidation::failed(
                    ExecutionError::system(
                        codes::OUTPUTS_NOT_GENERATED,
                        "Output reader was missing. Plugin/platform problem.",
                    )
                    .recoverable(),
                ));
            }
            None => return Ok(OutputValidation::ok(None)),
        };

        if reader.is_error().await? {
            let err = reader.read_error().await?;
            return Ok(OutputValidation::failed(
                err.trimmed(self.max_error_message_length),
            ));
        }

        if !outputs_declared {
            return Ok(OutputValidation::ok(None));
        }

        if !reader.exists().await? {
            return Ok(OutputValidation::failed(
                ExecutionError::user(
                    codes::OUTPUTS_NOT_FOUND,
                    "Outputs not generated by task execution",
                )
                .recoverable(),
            ));
        }

        if !reader.is_file() {
            output_writer.put(reader.clone()).await?;
        }

        if !template.metadata.discoverable {
            return Ok(OutputValidation::ok(None));
        }
        if properties.disable_node_level_caching {
            debug!(task = %template.id, "Node level caching is disabled, skipping catalog write");
            return Ok(OutputValidation::ok(None));
        }

        let key = CatalogKey::for_task(template, input_reader);
        let status = match self.catalog.put(&key, reader, metadata).await {
            Ok(status) => {
                self.metrics.record_catalog_put_success();
                debug!(task = %template.id, "Cached task outputs");
                status
            }
            Err(e) => {
                self.metrics.record_catalog_put_failure();
                error!(task = %template.id, error = %e, "Failed to write outputs to catalog");
                CatalogCacheStatus::PutFailure
            }
        };
        Ok(OutputValidation::ok(Some(status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use skein_core::error::SkeinError;
    use skein_core::traits::{CatalogEntry, DataStore};
    use skein_core::types::{
        DataReference, Identifier, Literal, LiteralMap, LiteralType, TypedInterface,
        WorkflowExecutionIdentifier, INPUTS_FILE,
    };
    use skein_storage::{
        InMemoryCatalog, InMemoryDataStore, RemoteFileInputReader, RemoteFileOutputWriter,
    };

    struct BrokenCatalog;

    impl CatalogClient for BrokenCatalog {
        fn get(&self, _key: &CatalogKey) -> BoxFuture<'_, Result<CatalogEntry>> {
            Box::pin(async { Err(SkeinError::Catalog("connection refused".into())) })
        }

        fn put(
            &self,
            _key: &CatalogKey,
            _reader: Arc<dyn OutputReader>,
            _metadata: CatalogMetadata,
        ) -> BoxFuture<'_, Result<CatalogCacheStatus>> {
            Box::pin(async { Err(SkeinError::Catalog("connection refused".into())) })
        }
    }

    struct Fixture {
        store: Arc<dyn DataStore>,
        output_dir: DataReference,
        input_reader: Arc<dyn InputReader>,
        writer: RemoteFileOutputWriter,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn DataStore> = Arc::new(InMemoryDataStore::new());
        let data_dir = DataReference::new("mem://test/exec/n1");
        let mut inputs = LiteralMap::new();
        inputs.insert("x".into(), Literal::integer(3));
        store
            .write_literals(&data_dir.join(INPUTS_FILE), &inputs)
            .await
            .unwrap();
        let output_dir = data_dir.join("0");
        Fixture {
            input_reader: Arc::new(RemoteFileInputReader::new(store.clone(), &data_dir)),
            writer: RemoteFileOutputWriter::new(store.clone(), &output_dir),
            output_dir,
            store,
        }
    }

    fn template() -> TaskTemplate {
        let mut interface = TypedInterface::default();
        interface.outputs.insert("y".into(), LiteralType::Integer);
        TaskTemplate::new(Identifier::task("square", "1"), "echo")
            .with_interface(interface)
            .discoverable("1.0")
    }

    fn outputs() -> LiteralMap {
        let mut outputs = LiteralMap::new();
        outputs.insert("y".into(), Literal::integer(9));
        outputs
    }

    fn metadata() -> CatalogMetadata {
        CatalogMetadata {
            execution_id: WorkflowExecutionIdentifier::new("p", "d", "exec"),
            node_id: "n1".into(),
            attempt: 0,
        }
    }

    fn gate(catalog: Arc<dyn CatalogClient>) -> (CatalogGate, Arc<EngineMetrics>) {
        let metrics = Arc::new(EngineMetrics::new("test"));
        (CatalogGate::new(catalog, metrics.clone(), 64), metrics)
    }

    #[tokio::test]
    async fn test_non_discoverable_task_skips_catalog() {
        let f = fixture().await;
        let (gate, metrics) = gate(Arc::new(BrokenCatalog));
        let template = TaskTemplate::new(Identifier::task("square", "1"), "echo");

        let lookup = gate
            .check_catalog_cache(&template, f.input_reader.clone(), &f.writer)
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup::Miss(CatalogCacheStatus::Disabled));
        assert_eq!(metrics.snapshot().catalog_get_failures, 0);
    }

    #[tokio::test]
    async fn test_miss_then_hit_commits_cached_outputs() {
        let f = fixture().await;
        let catalog = Arc::new(InMemoryCatalog::new());
        let (gate, metrics) = gate(catalog.clone());
        let template = template();

        let lookup = gate
            .check_catalog_cache(&template, f.input_reader.clone(), &f.writer)
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup::Miss(CatalogCacheStatus::Miss));

        let validation = gate
            .validate_output_and_cache_add(
                &template,
                PluginProperties::default(),
                f.input_reader.clone(),
                Some(Arc::new(InMemoryOutputReader::new(outputs()))),
                &f.writer,
                metadata(),
            )
            .await
            .unwrap();
        assert_eq!(validation.error, None);
        assert_eq!(validation.cache_status, Some(CatalogCacheStatus::Populated));
        assert_eq!(catalog.len(), 1);

        // A second lookup with the same inputs serves from the catalog.
        let g = fixture().await;
        let lookup = gate
            .check_catalog_cache(&template, g.input_reader.clone(), &g.writer)
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup::Hit);
        let committed = g
            .store
            .read_literals(&g.output_dir.join("outputs"))
            .await
            .unwrap();
        assert_eq!(committed, outputs());

        let snap = metrics.snapshot();
        assert_eq!(snap.catalog_misses, 1);
        assert_eq!(snap.catalog_hits, 1);
        assert_eq!(snap.catalog_put_successes, 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_best_effort() {
        let f = fixture().await;
        let (gate, metrics) = gate(Arc::new(BrokenCatalog));

        let lookup = gate
            .check_catalog_cache(&template(), f.input_reader.clone(), &f.writer)
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup::Miss(CatalogCacheStatus::LookupFailure));
        assert_eq!(metrics.snapshot().catalog_get_failures, 1);
    }

    #[tokio::test]
    async fn test_put_failure_does_not_fail_task() {
        let f = fixture().await;
        let (gate, metrics) = gate(Arc::new(BrokenCatalog));

        let validation = gate
            .validate_output_and_cache_add(
                &template(),
                PluginProperties::default(),
                f.input_reader.clone(),
                Some(Arc::new(InMemoryOutputReader::new(outputs()))),
                &f.writer,
                metadata(),
            )
            .await
            .unwrap();
        assert_eq!(validation.error, None);
        assert_eq!(validation.cache_status, Some(CatalogCacheStatus::PutFailure));
        assert_eq!(metrics.snapshot().catalog_put_failures, 1);
        assert!(f.store.exists(&f.output_dir.join("outputs")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_reader_with_declared_outputs() {
        let f = fixture().await;
        let (gate, _) = gate(Arc::new(InMemoryCatalog::new()));

        let validation = gate
            .validate_output_and_cache_add(
                &template(),
                PluginProperties::default(),
                f.input_reader.clone(),
                None,
                &f.writer,
                metadata(),
            )
            .await
            .unwrap();
        let err = validation.error.unwrap();
        assert_eq!(err.code, codes::OUTPUTS_NOT_GENERATED);
        assert!(err.recoverable);
    }

    #[tokio::test]
    async fn test_missing_outputs_are_recoverable() {
        let f = fixture().await;
        let (gate, _) = gate(Arc::new(InMemoryCatalog::new()));

        let validation = gate
            .validate_output_and_cache_add(
                &template(),
                PluginProperties::default(),
                f.input_reader.clone(),
                Some(Arc::new(InMemoryOutputReader::empty())),
                &f.writer,
                metadata(),
            )
            .await
            .unwrap();
        let err = validation.error.unwrap();
        assert_eq!(err.code, codes::OUTPUTS_NOT_FOUND);
        assert!(err.recoverable);
    }

    #[tokio::test]
    async fn test_task_error_document_is_trimmed() {
        let f = fixture().await;
        let (gate, _) = gate(Arc::new(InMemoryCatalog::new()));
        let reader = InMemoryOutputReader::with_error(ExecutionError::user("Crash", "x".repeat(500)));

        let validation = gate
            .validate_output_and_cache_add(
                &template(),
                PluginProperties::default(),
                f.input_reader.clone(),
                Some(Arc::new(reader)),
                &f.writer,
                metadata(),
            )
            .await
            .unwrap();
        let err = validation.error.unwrap();
        assert_eq!(err.code, "Crash");
        assert!(err.message.len() <= 64);
    }

    #[tokio::test]
    async fn test_plugin_level_caching_skips_catalog_write() {
        let f = fixture().await;
        let catalog = Arc::new(InMemoryCatalog::new());
        let (gate, _) = gate(catalog.clone());

        let validation = gate
            .validate_output_and_cache_add(
                &template(),
                PluginProperties {
                    disable_node_level_caching: true,
                },
                f.input_reader.clone(),
                Some(Arc::new(InMemoryOutputReader::new(outputs()))),
                &f.writer,
                metadata(),
            )
            .await
            .unwrap();
        assert_eq!(validation, OutputValidation::ok(None));
        assert!(catalog.is_empty());
    }
}
