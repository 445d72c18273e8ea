//! Log each delivery.

use async_trait::async_trait;
use tracing::info;

use super::{Component, ConfigError, Params, ProcessError};
use crate::hooks::{Hook, Request};
use crate::store::Partition;

pub struct LogAction;

impl LogAction {
    pub const NAME: &'static str = "log-action";
}

#[async_trait]
impl Component for LogAction {
    fn display_name(&self) -> &str {
        "Log"
    }

    fn config_template(&self) -> Option<&str> {
        None
    }

    async fn init(
        &self,
        _hook: &Hook,
        _params: &Params,
        _partition: &Partition<'_>,
    ) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        _partition: &Partition<'_>,
    ) -> Result<(), ProcessError> {
        info!(
            target: "components",
            hook = %hook.id,
            method = %request.method,
            bytes = request.body.len(),
            "[received] {} /h/{}",
            request.method,
            hook.id
        );
        Ok(())
    }
}
