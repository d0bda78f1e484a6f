use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Shared blocking client. Built once per process; the timeout passed on the
/// first call is the one that sticks.
pub fn http_client(timeout: Duration) -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(timeout)
            .user_agent(concat!("f1_forecast/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")
    })
}
