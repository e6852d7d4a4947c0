// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Contact Guard Service
//!
//! Sits in front of a contact form and decides, per submission, whether it is
//! accepted. Decisions are appended to `submissions.log`; blocklist changes
//! and blocked submissions go to `security.log`.
//!
//! ## Endpoints
//!
//! - `POST /submit`: url-encoded form post, answers `{allowed, message}`
//! - `GET /health`, `GET /healthz`
//! - `GET /metrics`: Prometheus text format (when enabled)
//! - `/admin/*`: blocklist, whitelist, reports and retention, behind a
//!   bearer token (absent when `ADMIN_TOKEN` is unset)
//!
//! ## Configuration
//!
//! An optional JSON file named by `CONTACT_GUARD_CONFIG`, then environment
//! variables (a `.env` file is honoured):
//!
//! - `BIND_ADDR`: Server bind address (default: 127.0.0.1:8080)
//! - `DATA_DIR`: Journal and list directory (default: ./data)
//! - `BLOCK_THRESHOLD`: Risk score that blocks (default: 30)
//! - `RATE_LIMIT_MAX`: Submissions per window per address (default: 5)
//! - `RATE_LIMIT_WINDOW_SECS`: Window length (default: 3600)
//! - `RETENTION_DAYS`: Days before addresses are anonymized (default: 14)
//! - `ADMIN_TOKEN`: Bearer token for the admin API
//! - `ALLOWED_REFERER_HOSTS`: Comma separated hosts a referer must match

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use contact_guard::{
    config::Config,
    handlers::{router, AppState},
    ContactGuard,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::load().context("loading configuration")?;
    info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.storage.data_dir.display(),
        max_per_window = config.rate_limit.max_per_window,
        window_secs = config.rate_limit.window_secs,
        admin_enabled = config.admin.token.is_some(),
        "Starting contact guard"
    );

    let addr: SocketAddr = config.bind_addr.parse().context("parsing BIND_ADDR")?;
    let guard = ContactGuard::open(config)?;
    let state = Arc::new(AppState::new(guard));

    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
