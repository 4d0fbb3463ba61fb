use async_trait::async_trait;

use super::{CallbackError, CallbackManager};
use crate::model::Tx;

/// Callback manager for deployments that do not notify anybody.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbackManager;

#[async_trait]
impl CallbackManager for NoopCallbackManager {
    async fn send(&self, _tx: &Tx) {}

    async fn stop(&self) -> Result<(), CallbackError> {
        Ok(())
    }
}
