//! Protocol configuration.
//!
//! Hosts either build a [`ProtocolConfig`] in code or load it from JSON.
//! Every field has a default so a partial document is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::IdKind;
use crate::wire::frame::MAX_FRAME_SIZE;

/// Settings for one side of a protocol connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Name used in log output.
    pub name: String,

    /// Which dynamic id range this side allocates from.
    pub id_kind: IdKind,

    /// Fail the handshake receive when the counterpart's serialization
    /// hash differs instead of only recording the model as out of sync.
    pub throw_error_on_out_of_sync_models: bool,

    /// Upper bound on a single frame's payload.
    pub max_frame_size: usize,

    /// Slice length used by pump-driven waits.
    pub pump_pause_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name: "protocol".to_string(),
            id_kind: IdKind::Client,
            throw_error_on_out_of_sync_models: false,
            max_frame_size: MAX_FRAME_SIZE,
            pump_pause_ms: 10,
        }
    }
}

impl ProtocolConfig {
    /// Config for the client side with the given name.
    pub fn client(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_kind: IdKind::Client,
            ..Self::default()
        }
    }

    /// Config for the server side with the given name.
    pub fn server(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_kind: IdKind::Server,
            ..Self::default()
        }
    }

    /// Parse a config from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn pump_pause(&self) -> Duration {
        Duration::from_millis(self.pump_pause_ms)
    }
}
