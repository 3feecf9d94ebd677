//! Start and end nodes: pass-through handlers that move data in and out of a
//! workflow.

use futures::future::BoxFuture;

use skein_core::error::Result;
use skein_core::types::OUTPUTS_FILE;

use crate::handler::{NodeExecutionContext, NodeHandler, Transition};

/// Publishes the workflow inputs, seeded at `{data_dir}/inputs`, as its outputs.
pub struct StartHandler;

impl NodeHandler for StartHandler {
    fn handle<'a>(&'a self, nctx: &'a NodeExecutionContext<'a>) -> BoxFuture<'a, Result<Transition>> {
        Box::pin(async move {
            let inputs_path = nctx.input_reader.inputs_path();
            if nctx.data_store.exists(&inputs_path).await? {
                let outputs_path = nctx.output_dir().join(OUTPUTS_FILE);
                nctx.data_store.copy_raw(&inputs_path, &outputs_path).await?;
            }
            Ok(Transition::success())
        })
    }

    fn abort<'a>(
        &'a self,
        _nctx: &'a NodeExecutionContext<'a>,
        _reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Collects its bound inputs as the workflow outputs.
pub struct EndHandler;

impl NodeHandler for EndHandler {
    fn handle<'a>(&'a self, nctx: &'a NodeExecutionContext<'a>) -> BoxFuture<'a, Result<Transition>> {
        Box::pin(async move {
            let inputs = nctx.input_reader.get().await?;
            let outputs_path = nctx.output_dir().join(OUTPUTS_FILE);
            nctx.data_store.write_literals(&outputs_path, &inputs).await?;
            Ok(Transition::success())
        })
    }

    fn abort<'a>(
        &'a self,
        _nctx: &'a NodeExecutionContext<'a>,
        _reason: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
