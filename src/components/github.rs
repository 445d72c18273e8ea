//! GitHub webhook signature validation and replay protection.

use async_trait::async_trait;
use tracing::debug;

use super::{required_field, required_param, Component, ConfigError, Params, ProcessError};
use crate::crypto::{hmac_sha1_hex, timing_safe_equal};
use crate::hooks::{Hook, Request};
use crate::store::Partition;

const SIGNATURE_HEADER: &str = "X-Hub-Signature";
const DELIVERY_HEADER: &str = "X-Github-Delivery";
const DELIVERIES_SET: &str = "deliveries";

/// Checks `X-Hub-Signature` against an HMAC-SHA1 of the body and refuses
/// delivery IDs it has already accepted.
pub struct GithubValidator;

impl GithubValidator {
    pub const NAME: &'static str = "github-validator";
}

#[async_trait]
impl Component for GithubValidator {
    fn display_name(&self) -> &str {
        "Github validator"
    }

    fn config_template(&self) -> Option<&str> {
        Some(Self::NAME)
    }

    fn config_fields(&self) -> &'static [&'static str] {
        &["secret"]
    }

    fn writes_state(&self) -> bool {
        true
    }

    async fn init(
        &self,
        _hook: &Hook,
        params: &Params,
        partition: &Partition<'_>,
    ) -> Result<(), ConfigError> {
        let secret = required_param(params, "secret")?;
        partition.set_field("secret", secret).await?;
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        partition: &Partition<'_>,
    ) -> Result<(), ProcessError> {
        let secret = required_field(partition, "secret").await?;

        let digest = hmac_sha1_hex(secret.as_bytes(), request.body.trim_ascii())
            .map_err(|e| ProcessError::rejected(format!("invalid secret: {e}")))?;
        let expected = format!("sha1={digest}");
        let provided = request.header(SIGNATURE_HEADER).unwrap_or_default();
        if !timing_safe_equal(provided, &expected) {
            return Err(ProcessError::rejected("invalid signature"));
        }

        let delivery = match request.header(DELIVERY_HEADER) {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ProcessError::rejected("missing delivery id")),
        };
        let deliveries = partition.set(DELIVERIES_SET);
        if deliveries.contains(delivery).await? {
            return Err(ProcessError::rejected("duplicate delivery"));
        }
        deliveries.insert(delivery).await?;

        debug!(target: "components", hook = %hook.id, delivery, "github delivery verified");
        Ok(())
    }
}
