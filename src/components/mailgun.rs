//! Mailgun webhook signature validation and replay protection.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::{required_field, required_param, Component, ConfigError, Params, ProcessError};
use crate::crypto::{hmac_sha256_hex, timing_safe_equal};
use crate::hooks::{Hook, Request};
use crate::store::Partition;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const TOKENS_SET: &str = "tokens";

/// Verifies Mailgun's `signature` form field (HMAC-SHA256 of `timestamp`
/// followed by `token`) and refuses tokens it has already seen.
pub struct MailgunValidator;

impl MailgunValidator {
    pub const NAME: &'static str = "mailgun-validator";
}

#[async_trait]
impl Component for MailgunValidator {
    fn display_name(&self) -> &str {
        "Mailgun validator"
    }

    fn config_template(&self) -> Option<&str> {
        Some(Self::NAME)
    }

    fn config_fields(&self) -> &'static [&'static str] {
        &["apikey"]
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
        let apikey = required_param(params, "apikey")?;
        partition.set_field("apikey", apikey).await?;
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        partition: &Partition<'_>,
    ) -> Result<(), ProcessError> {
        let apikey = required_field(partition, "apikey").await?;

        let content_type = request.header("Content-Type").unwrap_or_default();
        if !is_form_content_type(content_type) {
            return Err(ProcessError::rejected(format!(
                "unexpected Content-Type: {content_type:?}"
            )));
        }

        let form: HashMap<String, String> = url::form_urlencoded::parse(&request.body)
            .into_owned()
            .collect();
        let field = |name: &str| form.get(name).map(String::as_str).unwrap_or_default();
        let timestamp = field("timestamp");
        let token = field("token");
        let signature = field("signature");

        let expected = hmac_sha256_hex(apikey.as_bytes(), format!("{timestamp}{token}").as_bytes())
            .map_err(|e| ProcessError::rejected(format!("invalid api key: {e}")))?;
        if !timing_safe_equal(signature, &expected) {
            return Err(ProcessError::rejected("invalid signature"));
        }

        let tokens = partition.set(TOKENS_SET);
        if tokens.contains(token).await? {
            return Err(ProcessError::rejected("duplicate request token received"));
        }
        tokens.insert(token).await?;

        debug!(target: "components", hook = %hook.id, "mailgun delivery verified");
        Ok(())
    }
}

/// Media type match, ignoring parameters such as `charset`.
fn is_form_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::test_support::{open_store, params, write_tx};

    fn mailgun_request(apikey: &str, timestamp: &str, token: &str) -> Request {
        let signature = hmac_sha256_hex(apikey.as_bytes(), format!("{timestamp}{token}").as_bytes())
            .unwrap();
        let body = format!("timestamp={timestamp}&token={token}&signature={signature}&event=delivered");
        Request::new("POST", body).with_header("content-type", FORM_CONTENT_TYPE)
    }

    #[tokio::test]
    async fn test_valid_then_duplicate_token() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("mail");
        let tx = write_tx(&store).await;
        let partition = tx.partition(MailgunValidator::NAME, "mail");
        MailgunValidator
            .init(&hook, &params(&[("apikey", "key-123")]), &partition)
            .await
            .unwrap();

        let request = mailgun_request("key-123", "1700000000", "tok-abc");
        MailgunValidator
            .process(&hook, &request, &partition)
            .await
            .unwrap();

        let err = MailgunValidator
            .process(&hook, &request, &partition)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate request token received");
    }

    #[tokio::test]
    async fn test_bad_signature() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("mail");
        let tx = write_tx(&store).await;
        let partition = tx.partition(MailgunValidator::NAME, "mail");
        MailgunValidator
            .init(&hook, &params(&[("apikey", "key-123")]), &partition)
            .await
            .unwrap();

        let request = mailgun_request("other-key", "1700000000", "tok-abc");
        let err = MailgunValidator
            .process(&hook, &request, &partition)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid signature");
    }

    #[tokio::test]
    async fn test_wrong_content_type() {
        let (store, _dir) = open_store().await;
        let hook = Hook::new("mail");
        let tx = write_tx(&store).await;
        let partition = tx.partition(MailgunValidator::NAME, "mail");
        MailgunValidator
            .init(&hook, &params(&[("apikey", "key-123")]), &partition)
            .await
            .unwrap();

        let request = Request::new("POST", "{}").with_header("Content-Type", "application/json");
        let err = MailgunValidator
            .process(&hook, &request, &partition)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("unexpected Content-Type"));
    }

    #[test]
    fn test_is_form_content_type() {
        assert!(is_form_content_type("application/x-www-form-urlencoded"));
        assert!(is_form_content_type(
            "application/x-www-form-urlencoded; charset=utf-8"
        ));
        assert!(!is_form_content_type("multipart/form-data"));
        assert!(!is_form_content_type(""));
    }
}
