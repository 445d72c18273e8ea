//! Dump each delivery to its own file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{Component, ComponentSettings, ConfigError, Params, ProcessError};
use crate::crypto::generate_hex_secret;
use crate::hooks::{Hook, Request};
use crate::store::Partition;

pub struct WriteFileAction {
    dir: PathBuf,
}

impl WriteFileAction {
    pub const NAME: &'static str = "write-file-action";

    pub fn new(settings: &ComponentSettings) -> Self {
        Self {
            dir: settings.artifact_dir.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Component for WriteFileAction {
    fn display_name(&self) -> &str {
        "Write to file"
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
        let suffix = generate_hex_secret(8)
            .map_err(|e| ProcessError::Io(std::io::Error::other(e.to_string())))?;
        let filename = format!(
            "hook_{}_{}_{}.log",
            hook.id,
            request.received_at.format("%Y-%m-%d_%H-%M-%S"),
            suffix
        );
        let path = self.dir.join(filename);

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, render(hook, request)).await?;

        debug!(target: "components", hook = %hook.id, path = %path.display(), "delivery written to file");
        Ok(())
    }
}

fn render(hook: &Hook, request: &Request) -> Vec<u8> {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "Hook {:?} received at {}",
        hook.id,
        request.received_at.to_rfc3339()
    );
    let _ = writeln!(text, "{} /h/{}\n", request.method, hook.id);
    text.push_str("Headers:\n");
    for (name, value) in &request.headers {
        let _ = writeln!(text, "{name} = {value}");
    }
    text.push_str("\nBody:\n");

    let mut out = text.into_bytes();
    out.extend_from_slice(&request.body);
    out
}
