// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol version constants and the capability payload embedded in
//! most API responses.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Wire protocol version advertised to clients.
pub const PROTOCOL_VERSION: u32 = 3;

/// Oldest client protocol the server still accepts.
pub const MIN_SUPPORTED_PROTOCOL_VERSION: u32 = 1;

/// Server build version.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capability payload: `{protocol_version, min_supported_protocol_version,
/// server_version, features}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolPayload {
    pub protocol_version: u32,
    pub min_supported_protocol_version: u32,
    pub server_version: String,
    pub features: serde_json::Value,
}

/// Build the protocol payload advertised by this build.
pub fn protocol_payload() -> ProtocolPayload {
    ProtocolPayload {
        protocol_version: PROTOCOL_VERSION,
        min_supported_protocol_version: MIN_SUPPORTED_PROTOCOL_VERSION,
        server_version: SERVER_VERSION.to_owned(),
        features: json!({
            "fileTransferSha256": true,
            "inputLock": true,
            "qrPairing": true,
            "adaptiveStream": true,
            "systemPower": true,
        }),
    }
}

/// Merge the protocol payload fields into a JSON object payload.
pub fn merge_protocol(out: &mut serde_json::Map<String, serde_json::Value>) {
    let payload = protocol_payload();
    out.insert("protocol_version".to_owned(), payload.protocol_version.into());
    out.insert(
        "min_supported_protocol_version".to_owned(),
        payload.min_supported_protocol_version.into(),
    );
    out.insert("server_version".to_owned(), payload.server_version.into());
    out.insert("features".to_owned(), payload.features);
}

/// Return current epoch seconds as a float.
pub fn epoch_s() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
