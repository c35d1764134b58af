use std::time::Duration;

use anyhow::{Context, Result};
use drest_lib::{
    Client, ClientBuilder, DEFAULT_READ_TIMEOUT,
    quirks::Quirks,
    ratelimit::RateLimitConfig,
    transport::TrustStore,
};

use crate::options::Config;

/// Creates a client according to the command-line config
pub(crate) fn create(cfg: &Config) -> Result<Client> {
    let trust_store = cfg
        .cacert
        .clone()
        .map_or(TrustStore::Native, TrustStore::PemFile);

    let quirks = if cfg.no_quirks {
        Quirks::none()
    } else {
        Quirks::default()
    };

    let rate_limit =
        RateLimitConfig::from_options(Some(cfg.max_retries), cfg.retry_wait, cfg.max_retry_wait);

    ClientBuilder::builder()
        .token(cfg.token.clone())
        .host(cfg.host.clone())
        .port(cfg.port)
        .api_base(cfg.api_base.clone())
        .user_agent(cfg.user_agent.clone())
        .timeout(Duration::from_secs(cfg.timeout))
        .read_timeout(cfg.read_timeout.unwrap_or(DEFAULT_READ_TIMEOUT))
        .trust_store(trust_store)
        .plaintext(cfg.plaintext)
        .quirks(quirks)
        .rate_limit(rate_limit)
        .build()
        .client()
        .context("Failed to create API client")
}
