pub mod profile;
pub mod snapshot;
pub mod update;

use std::sync::Arc;

use jiri_core::gitops::GitCli;
use jiri_core::remote::{HttpClient, NoRemoteIndex};
use jiri_core::Config;
use jiri_sync::SyncCtx;

/// Assemble the sync context with the production service implementations.
pub fn sync_ctx(config: Config) -> SyncCtx {
    SyncCtx {
        config,
        git: Arc::new(GitCli::new()),
        index: Arc::new(NoRemoteIndex),
        http: Arc::new(HttpClient::new()),
    }
}

/// Build the multi-thread runtime the sync engine runs on.
pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}
