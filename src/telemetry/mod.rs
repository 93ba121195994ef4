//! Live GPU telemetry over a persistent, self-healing WebSocket.
//!
//! The backend pushes one JSON text frame per sample. [`TelemetryClient`]
//! holds exactly one live connection, reconnects after failure with a fixed
//! delay, and republishes the latest [`Snapshot`] to observers.

mod client;
mod state;

pub use client::TelemetryClient;
pub use state::{ConnectionState, ConnectionStateMachine};

use serde::{Deserialize, Serialize};

/// One telemetry sample. Replaced wholesale on each inbound frame, never
/// merged field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub gpu_name: String,
    /// GPU utilization in percent.
    pub utilization: f64,
    /// Core temperature in degrees Celsius.
    pub temperature: f64,
    /// Fan speed in percent.
    pub fan_speed: f64,
    /// Total VRAM in MB.
    pub memory_total: u64,
    /// VRAM in use, in MB.
    pub memory_used: u64,
    /// Current power draw in watts.
    pub power_draw: f64,
    /// Board power limit in watts.
    pub power_limit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Error taxonomy for the telemetry path. Both variants are recoverable:
/// `Transport` closes the connection and schedules a reconnect, `Parse` drops
/// the frame and leaves the connection open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry transport error: {0}")]
    Transport(String),

    #[error("malformed telemetry frame: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_parses_backend_frame() {
        let frame = r#"{
            "gpu_name": "NVIDIA GeForce RTX 4090",
            "utilization": 87.5,
            "temperature": 62.0,
            "fan_speed": 45.0,
            "memory_total": 24564,
            "memory_used": 18210,
            "power_draw": 310.2,
            "power_limit": 450.0,
            "timestamp": "2024-11-02T18:30:00Z"
        }"#;

        let snapshot: Snapshot = serde_json::from_str(frame).unwrap();
        assert_eq!(snapshot.gpu_name, "NVIDIA GeForce RTX 4090");
        assert_eq!(snapshot.memory_total, 24564);
        assert_eq!(snapshot.timestamp.as_deref(), Some("2024-11-02T18:30:00Z"));
    }

    #[test]
    fn snapshot_timestamp_is_optional() {
        let frame = r#"{
            "gpu_name": "RTX 3080",
            "utilization": 0.0,
            "temperature": 35.0,
            "fan_speed": 0.0,
            "memory_total": 10240,
            "memory_used": 512,
            "power_draw": 25.0,
            "power_limit": 320.0
        }"#;

        let snapshot: Snapshot = serde_json::from_str(frame).unwrap();
        assert!(snapshot.timestamp.is_none());
    }

    #[test]
    fn malformed_frame_is_a_parse_error() {
        let result = serde_json::from_str::<Snapshot>("{not json");
        assert!(result.is_err());
    }
}
