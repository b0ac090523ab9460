// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state passed to all handlers via the axum `State`
//! extractor. Unit tests construct fresh instances through
//! `test_support::StateBuilder`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::capture::native::NativeStreamer;
use crate::capture::probe::CaptureProbe;
use crate::capture::StreamDiag;
use crate::config::ServerConfig;
use crate::events::LocalEventBus;
use crate::guard::InputGuard;
use crate::input::InputBackend;
use crate::pairing::{PairingState, QrTokenStore};
use crate::pin_limiter::{PinLimiter, PinLimits};
use crate::protocol::epoch_s;
use crate::session::{SessionPolicy, SessionStore};
use crate::stream::adapt::{parse_width_ladder, StabilizerPolicy, WidthStabilizer, DEFAULT_WIDTH_LADDER};
use crate::transport::hub::SocketHub;

/// Application context: every component the handlers touch.
pub struct AppState {
    config: RwLock<ServerConfig>,
    pub sessions: SessionStore,
    pub pin: PinLimiter,
    pub pairing: PairingState,
    pub qr: QrTokenStore,
    pub guard: InputGuard,
    pub events: LocalEventBus,
    pub hub: SocketHub,
    pub input: Arc<dyn InputBackend>,
    pub native: Arc<NativeStreamer>,
    pub probe: Arc<CaptureProbe>,
    pub stabilizer: WidthStabilizer,
    pub diag: Arc<StreamDiag>,
    pub sysinfo: Mutex<sysinfo::System>,
    pub started_at: Instant,
    pub server_id: String,
    bound_port: AtomicU16,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        input: Arc<dyn InputBackend>,
        native: Arc<NativeStreamer>,
    ) -> Arc<Self> {
        let now = epoch_s();
        let tuning = config.stream.clone();
        let sessions = SessionStore::new(
            Some(config.session_file.clone()),
            SessionPolicy {
                ttl_s: config.session_ttl_s,
                idle_ttl_s: config.session_idle_ttl_s,
                max_sessions: config.max_sessions,
            },
        );
        let pairing = PairingState::new(
            &config.pairing_code,
            config.pairing_ttl_s,
            config.pairing_single_use,
            now,
        );
        let qr = QrTokenStore::new(config.qr_token_ttl_s);
        let stabilizer = WidthStabilizer::new(StabilizerPolicy {
            ladder: parse_width_ladder(&tuning.adapt_width_ladder, &DEFAULT_WIDTH_LADDER),
            min_switch_s: tuning.adapt_min_switch_s(),
            hysteresis_ratio: tuning.adapt_hyst_ratio(),
            min_floor: tuning.min_w_floor,
            enabled: !tuning.disable_width_stabilizer,
        });
        let bound_port = AtomicU16::new(config.port);
        Arc::new(Self {
            config: RwLock::new(config),
            sessions,
            pin: PinLimiter::new(),
            pairing,
            qr,
            guard: InputGuard::new(),
            events: LocalEventBus::new(),
            hub: SocketHub::new(),
            input,
            native,
            probe: Arc::new(CaptureProbe::new(tuning)),
            stabilizer,
            diag: Arc::new(StreamDiag::new()),
            sysinfo: Mutex::new(sysinfo::System::new()),
            started_at: Instant::now(),
            server_id: crate::pairing::random_token(),
            bound_port,
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> ServerConfig {
        self.config.read().clone()
    }

    /// Re-read the configuration from the process environment.
    pub fn reload_config_from_env(&self) {
        *self.config.write() = ServerConfig::reload_from_env();
    }

    pub fn pin_limits(&self) -> PinLimits {
        PinLimits::from_config(&self.config.read())
    }

    /// Port the listener actually bound (differs from config with
    /// `PORT_AUTO`).
    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::Relaxed)
    }

    pub fn set_bound_port(&self, port: u16) {
        self.bound_port.store(port, Ordering::Relaxed);
    }

    /// Close a session's socket (best effort) and delete it from the
    /// store. Returns whether a session was deleted.
    pub fn revoke_session(&self, token: &str, reason: &str) -> bool {
        self.hub.close(
            token,
            Some(crate::transport::ws_msg::ServerEvent::SessionRevoked { reason: reason.to_owned() }),
        );
        self.stabilizer.forget(token);
        self.sessions.delete_session(token)
    }

    /// Revoke every session except `keep_token`; returns the revoked count.
    pub fn revoke_all(&self, keep_token: &str) -> usize {
        let keep = keep_token.trim();
        let mut revoked = 0;
        for token in self.sessions.list_tokens(true) {
            if !keep.is_empty() && token == keep {
                continue;
            }
            if self.revoke_session(&token, "revoked") {
                revoked += 1;
            }
        }
        revoked
    }

    /// Host CPU usage percentage (best effort).
    pub fn cpu_percent(&self) -> f64 {
        let mut sys = self.sysinfo.lock();
        sys.refresh_cpu_usage();
        f64::from(sys.global_cpu_usage())
    }

    /// Host RAM usage percentage (best effort).
    pub fn ram_percent(&self) -> f64 {
        let mut sys = self.sysinfo.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        sys.used_memory() as f64 * 100.0 / total as f64
    }

    /// Resident memory of this process in bytes.
    pub fn process_rss(&self) -> u64 {
        let Ok(pid) = sysinfo::get_current_pid() else { return 0 };
        let mut sys = self.sysinfo.lock();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}
