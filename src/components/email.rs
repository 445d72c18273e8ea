//! Email notification through the Mailgun messages API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::template::MessageTemplate;
use super::{
    required_param, Component, ComponentSettings, ConfigError, Params, ProcessError,
};
use crate::hooks::{Hook, Request};
use crate::store::Partition;

const FIELDS: &[&str] = &["token", "domain", "address", "subject", "template"];

pub struct EmailAction {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
    user_agent: String,
}

impl EmailAction {
    pub const NAME: &'static str = "email-action";

    pub fn new(settings: &ComponentSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: settings.mailgun_api_base.trim_end_matches('/').to_string(),
            timeout: settings.email_timeout,
            user_agent: settings.user_agent.clone(),
        }
    }

    fn messages_url(&self, domain: &str) -> String {
        format!("{}/v3/{}/messages", self.api_base, domain)
    }
}

#[async_trait]
impl Component for EmailAction {
    fn display_name(&self) -> &str {
        "Send email (using Mailgun)"
    }

    fn config_template(&self) -> Option<&str> {
        Some(Self::NAME)
    }

    fn config_fields(&self) -> &'static [&'static str] {
        FIELDS
    }

    async fn init(
        &self,
        _hook: &Hook,
        params: &Params,
        partition: &Partition<'_>,
    ) -> Result<(), ConfigError> {
        let token = required_param(params, "token")?;
        let domain = required_param(params, "domain")?;
        let address = required_param(params, "address")?;
        let subject = required_param(params, "subject")?;
        // The body template keeps its whitespace.
        let template = match params.get("template") {
            Some(t) if !t.trim().is_empty() => t.as_str(),
            _ => return Err(ConfigError::Missing("template")),
        };
        MessageTemplate::parse(template)
            .map_err(|e| ConfigError::invalid("template", format!("invalid template: {e}")))?;

        partition.set_field("token", token).await?;
        partition.set_field("domain", domain).await?;
        partition.set_field("address", address).await?;
        partition.set_field("subject", subject).await?;
        partition.set_field("template", template).await?;
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        request: &Request,
        partition: &Partition<'_>,
    ) -> Result<(), ProcessError> {
        let mut values = Vec::with_capacity(FIELDS.len());
        for field in FIELDS {
            match partition.field(field).await? {
                Some(value) if !value.is_empty() => values.push(value),
                _ => return Err(ProcessError::NotConfigured(field)),
            }
        }
        let [token, domain, address, subject, template] = <[String; 5]>::try_from(values)
            .map_err(|_| ProcessError::NotConfigured("template"))?;

        let text = MessageTemplate::parse(&template)
            .map_err(|e| ProcessError::rejected(format!("could not parse template: {e}")))?
            .render(hook, request);

        let from = format!("mail@{domain}");
        let form = [
            ("from", from.as_str()),
            ("to", address.as_str()),
            ("subject", subject.as_str()),
            ("text", text.as_str()),
        ];
        let response = self
            .client
            .post(self.messages_url(&domain))
            .timeout(self.timeout)
            .basic_auth("api", Some(&token))
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessError::Timeout(self.timeout)
                } else {
                    ProcessError::Upstream(format!("mailgun request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessError::Upstream(format!(
                "mailgun returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        debug!(target: "components", hook = %hook.id, to = %address, "email sent");
        Ok(())
    }
}
