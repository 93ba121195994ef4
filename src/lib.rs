//! Client core for the Spare Cycles home-GPU chat service
//!
//! This crate implements:
//! - Incremental reconstruction of streamed chat responses via the
//!   ChunkDecoder and StreamingResponseReader
//! - Transcript and turn lifecycle management via ChatSession
//! - A self-healing GPU telemetry feed over WebSocket via TelemetryClient
//!   and its ConnectionStateMachine
//! - A thin HTTP client for the backend's chat, models and health endpoints


pub mod backend;
pub mod config;
pub mod decoder;
pub mod logging;
pub mod session;
pub mod streaming;
pub mod telemetry;
pub mod types;

pub use backend::{ChatBackend, HttpChatBackend};
pub use decoder::ChunkDecoder;
pub use session::ChatSession;
pub use streaming::{ChunkStream, HttpChunkStream, StreamingResponseReader};
pub use telemetry::{ConnectionState, Snapshot, TelemetryClient, TelemetryError};
pub use types::*;
