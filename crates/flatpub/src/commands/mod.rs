pub mod inspect;
pub mod run;

use anyhow::anyhow;
use flatpub_build::{BuildError, RetryConfig, RetryingRunner, Skopeo, TokioCommandRunner};
use flatpub_config::FlatpubConfig;
use std::path::Path;
use std::sync::Arc;

/// Load the config from an explicit path, or from discovery
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FlatpubConfig> {
    let config = match path {
        Some(path) => FlatpubConfig::load(path)?,
        None => FlatpubConfig::load_or_default()?,
    };
    Ok(config)
}

/// skopeo with transient failures retried
pub fn skopeo(config: &FlatpubConfig) -> Skopeo {
    let runner = RetryingRunner::new(TokioCommandRunner, RetryConfig::from(&config.retry));
    Skopeo::new(config.skopeo.clone(), Arc::new(runner))
}

pub fn user_error(err: BuildError) -> anyhow::Error {
    anyhow!(err.user_message())
}
