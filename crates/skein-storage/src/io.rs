//! Input/output readers and writers over a [`DataStore`].
//!
//! Layout of a node's directories:
//! - `{data_dir}/inputs` holds the bound inputs
//! - `{output_dir}/outputs` holds committed outputs
//! - `{output_dir}/error` holds an error document written by the task

use std::sync::Arc;

use futures::future::BoxFuture;

use skein_core::error::{ExecutionError, Result, SkeinError};
use skein_core::traits::{DataStore, InputReader, OutputReader, OutputWriter};
use skein_core::types::{DataReference, LiteralMap, ERROR_FILE, INPUTS_FILE, OUTPUTS_FILE};

/// Reads `inputs` from a node's data directory.
pub struct RemoteFileInputReader {
    store: Arc<dyn DataStore>,
    inputs_path: DataReference,
}

impl RemoteFileInputReader {
    pub fn new(store: Arc<dyn DataStore>, data_dir: &DataReference) -> Self {
        Self {
            store,
            inputs_path: data_dir.join(INPUTS_FILE),
        }
    }
}

impl InputReader for RemoteFileInputReader {
    fn inputs_path(&self) -> DataReference {
        self.inputs_path.clone()
    }

    fn get(&self) -> BoxFuture<'_, Result<LiteralMap>> {
        Box::pin(async move {
            // A node without bindings has no inputs file.
            if !self.store.exists(&self.inputs_path).await? {
                return Ok(LiteralMap::new());
            }
            self.store.read_literals(&self.inputs_path).await
        })
    }
}

/// Outputs a task wrote directly into an output directory.
pub struct RemoteFileOutputReader {
    store: Arc<dyn DataStore>,
    outputs_path: DataReference,
    error_path: DataReference,
}

impl RemoteFileOutputReader {
    pub fn new(store: Arc<dyn DataStore>, output_dir: &DataReference) -> Self {
        Self {
            store,
            outputs_path: output_dir.join(OUTPUTS_FILE),
            error_path: output_dir.join(ERROR_FILE),
        }
    }
}

impl OutputReader for RemoteFileOutputReader {
    fn is_error(&self) -> BoxFuture<'_, Result<bool>> {
        self.store.exists(&self.error_path)
    }

    fn read_error(&self) -> BoxFuture<'_, Result<ExecutionError>> {
        Box::pin(async move {
            let bytes = self.store.read_raw(&self.error_path).await?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }

    fn exists(&self) -> BoxFuture<'_, Result<bool>> {
        self.store.exists(&self.outputs_path)
    }

    fn is_file(&self) -> bool {
        true
    }

    fn read(&self) -> BoxFuture<'_, Result<LiteralMap>> {
        self.store.read_literals(&self.outputs_path)
    }
}

/// Outputs or an error held in memory, e.g. values served from the catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutputReader {
    outputs: Option<LiteralMap>,
    error: Option<ExecutionError>,
}

impl InMemoryOutputReader {
    pub fn new(outputs: LiteralMap) -> Self {
        Self {
            outputs: Some(outputs),
            error: None,
        }
    }

    pub fn with_error(error: ExecutionError) -> Self {
        Self {
            outputs: None,
            error: Some(error),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl OutputReader for InMemoryOutputReader {
    fn is_error(&self) -> BoxFuture<'_, Result<bool>> {
        let is_error = self.error.is_some();
        Box::pin(async move { Ok(is_error) })
    }

    fn read_error(&self) -> BoxFuture<'_, Result<ExecutionError>> {
        let error = self
            .error
            .clone()
            .ok_or_else(|| SkeinError::DataNotFound("error document".to_string()));
        Box::pin(async move { error })
    }

    fn exists(&self) -> BoxFuture<'_, Result<bool>> {
        let exists = self.outputs.is_some();
        Box::pin(async move { Ok(exists) })
    }

    fn is_file(&self) -> bool {
        false
    }

    fn read(&self) -> BoxFuture<'_, Result<LiteralMap>> {
        let outputs = self
            .outputs
            .clone()
            .ok_or_else(|| SkeinError::DataNotFound("outputs".to_string()));
        Box::pin(async move { outputs })
    }
}

/// Commits outputs into `{output_dir}/outputs`.
pub struct RemoteFileOutputWriter {
    store: Arc<dyn DataStore>,
    outputs_path: DataReference,
}

impl RemoteFileOutputWriter {
    pub fn new(store: Arc<dyn DataStore>, output_dir: &DataReference) -> Self {
        Self {
            store,
            outputs_path: output_dir.join(OUTPUTS_FILE),
        }
    }
}

impl OutputWriter for RemoteFileOutputWriter {
    fn outputs_path(&self) -> DataReference {
        self.outputs_path.clone()
    }

    fn put(&self, reader: Arc<dyn OutputReader>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let outputs = reader.read().await?;
            self.store.write_literals(&self.outputs_path, &outputs).await
        })
    }
}
