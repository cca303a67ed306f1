//! rosbridge v2 operation envelopes. Every frame is a JSON object tagged by `op`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Operations the orchestrator sends to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Outgoing {
    Subscribe {
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Advertise {
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    Publish {
        topic: String,
        msg: Value,
    },
    CallService {
        service: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
}

impl Outgoing {
    pub fn topic(&self) -> Option<&str> {
        match self {
            Outgoing::Subscribe { topic, .. }
            | Outgoing::Advertise { topic, .. }
            | Outgoing::Publish { topic, .. } => Some(topic),
            Outgoing::CallService { .. } => None,
        }
    }
}

/// Operations the bridge sends back. Unknown ops fail to parse and are dropped by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Incoming {
    Publish {
        topic: String,
        #[serde(default)]
        msg: Value,
    },
    ServiceResponse {
        #[serde(default)]
        service: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        values: Value,
        #[serde(default = "default_result")]
        result: bool,
    },
    Status {
        #[serde(default)]
        level: String,
        #[serde(default)]
        msg: String,
    },
}

fn default_result() -> bool {
    true
}

impl Incoming {
    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
