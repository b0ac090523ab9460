// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed runtime configuration, loaded from the process environment at
//! startup and on explicit [`ServerConfig::reload_from_env`].

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Parse the broad truthy/falsy value set used by boolean knobs.
///
/// Recognized truthy: `1,true,yes,on,y,t`; falsy: `0,false,no,off,n,f`.
pub fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Ok(true),
        "0" | "false" | "no" | "off" | "n" | "f" => Ok(false),
        other => Err(format!("not a boolean value: {other:?}")),
    }
}

/// Configuration for the CyberDeck server core.
#[derive(Debug, Clone, Parser)]
#[command(name = "cyberdeck", about = "CyberDeck remote-desktop server core")]
pub struct ServerConfig {
    /// Host/interface to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8000, env = "PORT")]
    pub port: u16,

    /// Fall back to an ephemeral port when the configured port is taken.
    #[arg(long, default_value = "false", env = "PORT_AUTO", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub port_auto: bool,

    /// Advertised URL scheme (`http` or `https`).
    #[arg(long, default_value = "http", env = "SCHEME")]
    pub scheme: String,

    /// Whether TLS termination is enabled by the deploy environment.
    #[arg(long, default_value = "false", env = "TLS_ENABLED", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub tls_enabled: bool,

    /// TLS certificate path (passed through; generation is external).
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key path (passed through; generation is external).
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Initial 4-digit pairing code. A random code is generated when empty.
    #[arg(long, default_value = "", env = "PAIRING_CODE")]
    pub pairing_code: String,

    /// Pairing code lifetime in seconds (0 = unlimited).
    #[arg(long, default_value_t = 0, env = "PAIRING_TTL_S")]
    pub pairing_ttl_s: u64,

    /// Rotate the pairing code after each successful handshake.
    #[arg(long, default_value = "false", env = "PAIRING_SINGLE_USE", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub pairing_single_use: bool,

    /// One-shot QR token lifetime in seconds.
    #[arg(long, default_value_t = 180, env = "QR_TOKEN_TTL_S")]
    pub qr_token_ttl_s: u64,

    /// Session lifetime from creation in seconds (0 = unlimited).
    #[arg(long, default_value_t = 0, env = "SESSION_TTL_S")]
    pub session_ttl_s: u64,

    /// Session idle lifetime from last activity in seconds (0 = unlimited).
    #[arg(long, default_value_t = 0, env = "SESSION_IDLE_TTL_S")]
    pub session_idle_ttl_s: u64,

    /// Maximum number of approved sessions (0 = unlimited).
    #[arg(long, default_value_t = 0, env = "MAX_SESSIONS")]
    pub max_sessions: usize,

    /// Path of the persisted session store.
    #[arg(long, default_value = "cyberdeck_sessions.json", env = "SESSION_FILE")]
    pub session_file: PathBuf,

    /// PIN limiter sliding window length in seconds.
    #[arg(long, default_value_t = 60, env = "PIN_WINDOW_S")]
    pub pin_window_s: u64,

    /// Failures tolerated inside one window before blocking.
    #[arg(long, default_value_t = 8, env = "PIN_MAX_FAILS")]
    pub pin_max_fails: u32,

    /// Block duration after the failure threshold is reached, in seconds.
    #[arg(long, default_value_t = 300, env = "PIN_BLOCK_S")]
    pub pin_block_s: u64,

    /// Age after which idle per-IP counters are evicted, in seconds.
    #[arg(long, default_value_t = 7200, env = "PIN_STATE_STALE_S")]
    pub pin_state_stale_s: u64,

    /// Hard cap on tracked IPs (LRU eviction beyond this).
    #[arg(long, default_value_t = 4096, env = "PIN_STATE_MAX_IPS")]
    pub pin_state_max_ips: usize,

    /// Accept `?token=` query parameters in addition to `Authorization`.
    #[arg(long, default_value = "false", env = "ALLOW_QUERY_TOKEN", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub allow_query_token: bool,

    /// Maximum accepted upload size in bytes (0 = unlimited).
    #[arg(long, default_value_t = 0, env = "UPLOAD_MAX_BYTES")]
    pub upload_max_bytes: u64,

    /// Comma-separated upload extension whitelist (empty = any).
    #[arg(long, default_value = "", env = "UPLOAD_ALLOWED_EXT")]
    pub upload_allowed_ext: String,

    /// Directory receiving client uploads.
    #[arg(long, default_value = "uploads", env = "FILES_DIR")]
    pub files_dir: PathBuf,

    /// Hold new sessions in the approval queue until the operator allows them.
    #[arg(long, default_value = "false", env = "DEVICE_APPROVAL_REQUIRED", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub device_approval_required: bool,

    /// Advertised server name (machine hostname when empty).
    #[arg(long, default_value = "", env = "SERVER_NAME")]
    pub server_name: String,

    /// Input-socket heartbeat interval advertised in the hello event, seconds.
    #[arg(long, default_value_t = 6, env = "WS_HEARTBEAT_INTERVAL_S")]
    pub ws_heartbeat_interval_s: u64,

    /// Idle timeout after which a silent input socket is closed, seconds.
    #[arg(long, default_value_t = 24, env = "WS_HEARTBEAT_TIMEOUT_S")]
    pub ws_heartbeat_timeout_s: u64,

    #[command(flatten)]
    pub stream: StreamTuning,
}

impl ServerConfig {
    /// Re-read every knob from the current process environment.
    pub fn reload_from_env() -> Self {
        Self::parse_from(["cyberdeck"])
    }

    /// Advertised server name, defaulting to the machine hostname.
    pub fn server_name(&self) -> String {
        let name = self.server_name.trim();
        if !name.is_empty() {
            return name.to_owned();
        }
        hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "cyberdeck".to_owned())
    }

    /// Normalized extension whitelist: lowercase, dot-prefixed, deduplicated.
    pub fn allowed_extensions(&self) -> BTreeSet<String> {
        self.upload_allowed_ext
            .split(',')
            .map(|item| item.trim().to_ascii_lowercase())
            .filter(|item| !item.is_empty())
            .map(|item| if item.starts_with('.') { item } else { format!(".{item}") })
            .collect()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_interval_s.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_heartbeat_timeout_s.max(self.ws_heartbeat_interval_s.max(1)))
    }
}

/// Stream adaptation and capture backend tuning knobs.
///
/// Raw values are stored as parsed; clamping lives in the accessors so a
/// bad environment value degrades instead of failing startup.
#[derive(Debug, Clone, clap::Args)]
pub struct StreamTuning {
    /// Default MJPEG width when the request does not specify one.
    #[arg(long, default_value_t = 1280, env = "CYBERDECK_MJPEG_DEFAULT_W")]
    pub mjpeg_default_w: u32,

    /// Default MJPEG quality.
    #[arg(long, default_value_t = 55, env = "CYBERDECK_MJPEG_DEFAULT_Q")]
    pub mjpeg_default_q: u8,

    /// Quality floor applied to every MJPEG request.
    #[arg(long, default_value_t = 45, env = "CYBERDECK_MJPEG_MIN_Q")]
    pub mjpeg_min_q: u8,

    /// Quality floor in low-latency mode.
    #[arg(long, default_value_t = 35, env = "CYBERDECK_MJPEG_MIN_Q_LOWLAT")]
    pub mjpeg_min_q_lowlat: u8,

    /// Default the MJPEG path to low-latency mode.
    #[arg(long, default_value = "true", env = "CYBERDECK_MJPEG_LOWLAT_DEFAULT", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub mjpeg_lowlat_default: bool,

    /// Default offered maximum stream width.
    #[arg(long, default_value_t = 1920, env = "CYBERDECK_STREAM_OFFER_MAX_W")]
    pub offer_max_w: u32,

    /// Default offered quality.
    #[arg(long, default_value_t = 55, env = "CYBERDECK_STREAM_OFFER_Q")]
    pub offer_q: u8,

    /// Default H.264 bitrate in kbit/s.
    #[arg(long, default_value_t = 6000, env = "CYBERDECK_H264_BITRATE_K")]
    pub h264_bitrate_k: u32,

    /// Default H.265 bitrate in kbit/s.
    #[arg(long, default_value_t = 4200, env = "CYBERDECK_H265_BITRATE_K")]
    pub h265_bitrate_k: u32,

    /// Width cap in low-latency mode.
    #[arg(long, default_value_t = 1280, env = "CYBERDECK_LOWLAT_MAX_W")]
    pub lowlat_max_w: u32,

    /// Quality cap in low-latency mode.
    #[arg(long, default_value_t = 50, env = "CYBERDECK_LOWLAT_MAX_Q")]
    pub lowlat_max_q: u8,

    /// Frame-rate cap in low-latency mode (30 on Wayland, 60 elsewhere
    /// when unset).
    #[arg(long, env = "CYBERDECK_LOWLAT_MAX_FPS")]
    pub lowlat_max_fps: Option<u32>,

    /// Width cap for the screenshot-loop backend.
    #[arg(long, default_value_t = 1280, env = "CYBERDECK_SCREENSHOT_MAX_W")]
    pub screenshot_max_w: u32,

    /// Quality cap for the screenshot-loop backend.
    #[arg(long, default_value_t = 50, env = "CYBERDECK_SCREENSHOT_MAX_Q")]
    pub screenshot_max_q: u8,

    /// Frame-rate cap for the screenshot-loop backend (10 on Wayland,
    /// 15 elsewhere when unset).
    #[arg(long, env = "CYBERDECK_SCREENSHOT_MAX_FPS")]
    pub screenshot_max_fps: Option<u32>,

    /// How long a subprocess backend may take to produce its first usable
    /// chunk before the next candidate is tried, seconds.
    #[arg(long, default_value_t = 4.0, env = "CYBERDECK_STREAM_FIRST_CHUNK_TIMEOUT_S")]
    pub first_chunk_timeout_s: f64,

    /// Budget after which the last good frame is re-emitted to keep the
    /// connection warm, seconds.
    #[arg(long, default_value_t = 0.35, env = "CYBERDECK_STREAM_STALE_KEEPALIVE_S")]
    pub stale_keepalive_s: f64,

    /// Capacity of the subprocess stdout chunk queue (drop-oldest).
    #[arg(long, default_value_t = 1, env = "CYBERDECK_STREAM_STDOUT_QUEUE_SIZE")]
    pub stdout_queue_size: usize,

    /// Subprocess stdout read chunk size in bytes.
    #[arg(long, default_value_t = 32768, env = "CYBERDECK_STREAM_STDOUT_READ_CHUNK")]
    pub stdout_read_chunk: usize,

    /// Reconnect hint returned in the stream offer, milliseconds.
    #[arg(long, default_value_t = 700, env = "CYBERDECK_STREAM_RECONNECT_HINT_MS")]
    pub reconnect_hint_ms: u64,

    /// Default low-latency flag for offered candidates.
    #[arg(long, default_value = "true", env = "CYBERDECK_OFFER_LOW_LATENCY_DEFAULT", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub offer_low_latency_default: bool,

    /// Default cursor-overlay flag for offered candidates.
    #[arg(long, default_value = "false", env = "CYBERDECK_OFFER_CURSOR_DEFAULT", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub offer_cursor_default: bool,

    /// Comma-separated adaptive width ladder override.
    #[arg(long, default_value = "", env = "CYBERDECK_ADAPT_WIDTH_LADDER")]
    pub adapt_width_ladder: String,

    /// Minimum interval between width switches, seconds.
    #[arg(long, default_value_t = 8.0, env = "CYBERDECK_ADAPT_MIN_SWITCH_S")]
    pub adapt_min_switch_s: f64,

    /// Relative width change ignored as jitter.
    #[arg(long, default_value_t = 0.18, env = "CYBERDECK_ADAPT_HYST_RATIO")]
    pub adapt_hyst_ratio: f64,

    /// Width floor the stabilizer will not go below.
    #[arg(long, default_value_t = 1024, env = "CYBERDECK_STREAM_MIN_W_FLOOR")]
    pub min_w_floor: u32,

    /// Disable the per-session width stabilizer.
    #[arg(long, default_value = "false", env = "CYBERDECK_DISABLE_WIDTH_STABILIZER", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub disable_width_stabilizer: bool,

    /// RTT above which clients should start degrading, milliseconds.
    #[arg(long, default_value_t = 220, env = "CYBERDECK_ADAPT_RTT_HIGH_MS")]
    pub adapt_rtt_high_ms: u64,

    /// RTT above which clients should degrade aggressively, milliseconds.
    #[arg(long, default_value_t = 340, env = "CYBERDECK_ADAPT_RTT_CRIT_MS")]
    pub adapt_rtt_crit_ms: u64,

    /// Achieved/target fps ratio below which clients should degrade.
    #[arg(long, default_value_t = 0.62, env = "CYBERDECK_ADAPT_FPS_DROP_THRESHOLD")]
    pub adapt_fps_drop_threshold: f64,

    /// Client-side degrade steps.
    #[arg(long, default_value_t = 2, env = "CYBERDECK_ADAPT_DEC_FPS_STEP")]
    pub adapt_dec_fps_step: u32,
    #[arg(long, default_value_t = 64, env = "CYBERDECK_ADAPT_DEC_W_STEP")]
    pub adapt_dec_w_step: u32,
    #[arg(long, default_value_t = 5, env = "CYBERDECK_ADAPT_DEC_Q_STEP")]
    pub adapt_dec_q_step: u32,

    /// Client-side recover steps.
    #[arg(long, default_value_t = 1, env = "CYBERDECK_ADAPT_INC_FPS_STEP")]
    pub adapt_inc_fps_step: u32,
    #[arg(long, default_value_t = 64, env = "CYBERDECK_ADAPT_INC_W_STEP")]
    pub adapt_inc_w_step: u32,
    #[arg(long, default_value_t = 2, env = "CYBERDECK_ADAPT_INC_Q_STEP")]
    pub adapt_inc_q_step: u32,

    /// Comma-separated MJPEG backend order override.
    #[arg(long, default_value = "", env = "CYBERDECK_MJPEG_BACKEND_ORDER")]
    pub mjpeg_backend_order: String,

    /// Disable the ffmpeg MJPEG backend entirely.
    #[arg(long, default_value = "false", env = "CYBERDECK_DISABLE_FFMPEG_MJPEG", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub disable_ffmpeg_mjpeg: bool,

    /// On Wayland, demote x11grab-only ffmpeg when alternatives exist.
    #[arg(long, default_value = "true", env = "CYBERDECK_WAYLAND_PREFER_NON_X11GRAB", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub wayland_prefer_non_x11grab: bool,

    /// Force x11grab capture on Wayland regardless of alternatives.
    #[arg(long, default_value = "false", env = "CYBERDECK_FORCE_WAYLAND_X11GRAB", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub force_wayland_x11grab: bool,

    /// Allow XWayland capture fallback in mixed Wayland sessions.
    #[arg(long, default_value = "true", env = "CYBERDECK_WAYLAND_ALLOW_X11_FALLBACK", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub wayland_allow_x11_fallback: bool,

    /// Put MJPEG candidates before TS candidates in Wayland offers.
    #[arg(long, default_value = "true", env = "CYBERDECK_PREFER_MJPEG_OFFER", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub prefer_mjpeg_offer: bool,

    /// Explicit ffmpeg binary override.
    #[arg(long, env = "CYBERDECK_FFMPEG_BIN")]
    pub ffmpeg_bin: Option<PathBuf>,

    /// Explicit pipewire capture node override.
    #[arg(long, env = "CYBERDECK_PIPEWIRE_NODE")]
    pub pipewire_node: Option<String>,

    /// Maximum discovered pipewire source candidates to try.
    #[arg(long, default_value_t = 2, env = "CYBERDECK_PIPEWIRE_MAX_SOURCES")]
    pub pipewire_max_sources: usize,

    /// Explicit screenshot tool override.
    #[arg(long, env = "CYBERDECK_SCREENSHOT_TOOL")]
    pub screenshot_tool: Option<String>,

    /// Allow the gnome-screenshot CLI in the screenshot tool chain.
    #[arg(long, default_value = "false", env = "CYBERDECK_ALLOW_GNOME_SCREENSHOT", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub allow_gnome_screenshot: bool,

    /// `||`-separated ffmpeg audio input candidates, or `off` to disable.
    #[arg(long, env = "CYBERDECK_AUDIO_INPUT_ARGS")]
    pub audio_input_args: Option<String>,

    /// AAC bitrate for muxed audio, kbit/s.
    #[arg(long, default_value_t = 128, env = "CYBERDECK_AUDIO_BITRATE_K")]
    pub audio_bitrate_k: u32,

    /// Prefer ddagrab over gdigrab on Windows.
    #[arg(long, default_value = "true", env = "CYBERDECK_WINDOWS_TRY_DDAGRAB", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub windows_try_ddagrab: bool,

    /// Per-command timeout for system power actions, seconds.
    #[arg(long, default_value_t = 3.0, env = "CYBERDECK_SYSTEM_CMD_TIMEOUT_S")]
    pub system_cmd_timeout_s: f64,

    /// Native capture loop base width.
    #[arg(long, default_value_t = 960, env = "CYBERDECK_STREAM_W")]
    pub native_w: u32,

    /// Native capture loop base quality.
    #[arg(long, default_value_t = 25, env = "CYBERDECK_STREAM_Q")]
    pub native_q: u8,

    /// Native capture loop base frame rate.
    #[arg(long, default_value_t = 60, env = "CYBERDECK_STREAM_FPS")]
    pub native_fps: u32,

    /// Native capture loop frame-rate ceiling.
    #[arg(long, default_value_t = 120, env = "CYBERDECK_STREAM_MAX_FPS")]
    pub native_max_fps: u32,

    /// Draw the cursor overlay in the native capture loop by default.
    #[arg(long, default_value = "false", env = "CYBERDECK_STREAM_CURSOR", value_parser = parse_flag, action = clap::ArgAction::Set)]
    pub native_cursor: bool,

    /// Monitor captured by the native loop by default.
    #[arg(long, default_value_t = 1, env = "CYBERDECK_STREAM_MONITOR")]
    pub native_monitor: u32,
}

impl StreamTuning {
    pub fn mjpeg_default_w(&self) -> u32 {
        self.mjpeg_default_w.max(640)
    }

    pub fn mjpeg_default_q(&self) -> u8 {
        self.mjpeg_default_q.clamp(20, 95)
    }

    pub fn mjpeg_min_q(&self) -> u8 {
        self.mjpeg_min_q.clamp(10, 95)
    }

    pub fn mjpeg_min_q_lowlat(&self) -> u8 {
        self.mjpeg_min_q_lowlat.clamp(10, 95)
    }

    pub fn offer_max_w(&self) -> u32 {
        self.offer_max_w.max(640)
    }

    pub fn offer_q(&self) -> u8 {
        self.offer_q.clamp(20, 95)
    }

    pub fn h264_bitrate_k(&self) -> u32 {
        self.h264_bitrate_k.max(500)
    }

    pub fn h265_bitrate_k(&self) -> u32 {
        self.h265_bitrate_k.max(500)
    }

    pub fn lowlat_max_w(&self) -> u32 {
        self.lowlat_max_w.max(640)
    }

    pub fn lowlat_max_q(&self) -> u8 {
        self.lowlat_max_q.clamp(20, 95)
    }

    pub fn lowlat_max_fps(&self, wayland: bool) -> u32 {
        self.lowlat_max_fps.unwrap_or(if wayland { 30 } else { 60 }).max(10)
    }

    pub fn screenshot_max_w(&self) -> u32 {
        self.screenshot_max_w.max(480)
    }

    pub fn screenshot_max_q(&self) -> u8 {
        self.screenshot_max_q.clamp(20, 95)
    }

    pub fn screenshot_max_fps(&self, wayland: bool) -> u32 {
        self.screenshot_max_fps.unwrap_or(if wayland { 10 } else { 15 }).max(2)
    }

    pub fn first_chunk_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.first_chunk_timeout_s.max(2.5))
    }

    pub fn stale_keepalive(&self) -> Duration {
        Duration::from_secs_f64(self.stale_keepalive_s.max(0.2))
    }

    pub fn stdout_queue_size(&self) -> usize {
        self.stdout_queue_size.max(1)
    }

    pub fn stdout_read_chunk(&self) -> usize {
        self.stdout_read_chunk.max(4096)
    }

    pub fn reconnect_hint_ms(&self) -> u64 {
        self.reconnect_hint_ms.max(250)
    }

    pub fn adapt_min_switch_s(&self) -> f64 {
        self.adapt_min_switch_s.max(0.0)
    }

    pub fn adapt_hyst_ratio(&self) -> f64 {
        self.adapt_hyst_ratio.clamp(0.0, 0.9)
    }

    pub fn adapt_rtt_high_ms(&self) -> u64 {
        self.adapt_rtt_high_ms.max(80)
    }

    pub fn adapt_rtt_crit_ms(&self) -> u64 {
        self.adapt_rtt_crit_ms.max(self.adapt_rtt_high_ms() + 40)
    }

    pub fn adapt_fps_drop_threshold(&self) -> f64 {
        self.adapt_fps_drop_threshold.clamp(0.3, 0.95)
    }

    pub fn pipewire_max_sources(&self) -> usize {
        self.pipewire_max_sources.clamp(1, 8)
    }

    pub fn audio_bitrate_k(&self) -> u32 {
        self.audio_bitrate_k.clamp(48, 256)
    }

    pub fn system_cmd_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.system_cmd_timeout_s.clamp(0.2, 30.0))
    }

    pub fn native_w(&self) -> u32 {
        self.native_w.max(320)
    }

    pub fn native_q(&self) -> u8 {
        self.native_q.clamp(10, 95)
    }

    pub fn native_max_fps(&self) -> u32 {
        self.native_max_fps.max(10)
    }

    pub fn native_fps(&self) -> u32 {
        self.native_fps.clamp(5, self.native_max_fps())
    }

    pub fn native_monitor(&self) -> u32 {
        self.native_monitor.max(1)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
