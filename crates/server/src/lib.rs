// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CyberDeck server core: session termination, adaptive screen
//! streaming, the low-latency input socket, and the pairing/permission
//! model in front of them.

pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod input;
pub mod net;
pub mod pairing;
pub mod pin_limiter;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::capture::native::NativeStreamer;
use crate::capture::probe::is_wayland_session;
use crate::config::ServerConfig;
use crate::input::{InputBackend, NullInputBackend};
use crate::protocol::epoch_s;
use crate::transport::ws_msg::ServerEvent;
use crate::transport::{build_router, AppState};

/// Interval of the periodic session TTL/idle sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Run the server until shutdown, using the default (null) input backend.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    run_with_backend(config, Arc::new(NullInputBackend)).await
}

/// Run the server with an injected input backend.
pub async fn run_with_backend(
    config: ServerConfig,
    input: Arc<dyn InputBackend>,
) -> anyhow::Result<()> {
    if config.tls_enabled {
        let cert_ok = config.tls_cert.as_ref().is_some_and(|p| p.is_file());
        let key_ok = config.tls_key.as_ref().is_some_and(|p| p.is_file());
        anyhow::ensure!(cert_ok && key_ok, "TLS enabled but certificate or key file is missing");
        // Termination itself is delegated to the fronting layer; the core
        // validates the material and advertises the https scheme.
        info!("TLS material present; advertising {} URLs", config.scheme);
    }

    let native = if is_wayland_session() {
        NativeStreamer::disabled(&config.stream, "wayland_session")
    } else {
        NativeStreamer::spawn(&config.stream, Arc::clone(&input))
    };
    let state = AppState::new(config.clone(), input, native);
    let loaded = state.sessions.load(epoch_s());
    if loaded > 0 {
        info!(sessions = loaded, "restored persisted sessions");
    }

    spawn_session_sweeper(Arc::clone(&state));

    let listener = bind_listener(&config).await?;
    let addr = listener.local_addr().context("listener address")?;
    state.set_bound_port(addr.port());
    info!(%addr, "cyberdeck server listening");

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server loop failed")?;

    state.native.stop();
    Ok(())
}

async fn bind_listener(config: &ServerConfig) -> anyhow::Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(e) if config.port_auto => {
            warn!(err = %e, port = config.port, "configured port unavailable, falling back to ephemeral");
            TcpListener::bind((config.host.as_str(), 0))
                .await
                .with_context(|| format!("binding {}:0", config.host))
        }
        Err(e) => Err(e).with_context(|| format!("binding {addr}")),
    }
}

/// Periodic TTL/idle eviction; revoked sessions get their sockets closed.
fn spawn_session_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            for token in state.sessions.sweep(epoch_s()) {
                state.hub.close(
                    &token,
                    Some(ServerEvent::SessionRevoked { reason: "expired".to_owned() }),
                );
                state.stabilizer.forget(&token);
                info!(token = %&token[..token.len().min(8)], "session expired");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(_) => return ctrl_c.await,
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}
