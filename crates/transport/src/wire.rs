use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages received from the remote dispatcher.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Inbound {
    #[serde(rename_all = "camelCase")]
    Execute {
        command_id: String,
        #[serde(rename = "type")]
        command_type: String,
        #[serde(default)]
        payload: Value,
    },
    /// Heartbeat echoes are dropped before they reach the router.
    Heartbeat {
        #[serde(default)]
        echo: bool,
    },
}

/// Messages sent back to the remote dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    Progress {
        command_id: String,
        step: u32,
        total: u32,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Result { command_id: String, data: Value },
    #[serde(rename_all = "camelCase")]
    Error {
        command_id: String,
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Heartbeat { ts: i64 },
}

impl Outbound {
    pub fn heartbeat() -> Self {
        Outbound::Heartbeat {
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_deserialize() {
        let raw = r#"{
            "action": "execute",
            "commandId": "cmd-42",
            "type": "scrape-profiles",
            "payload": {"companyName": "Acme"}
        }"#;
        let msg: Inbound = serde_json::from_str(raw).unwrap();
        match msg {
            Inbound::Execute {
                command_id,
                command_type,
                payload,
            } => {
                assert_eq!(command_id, "cmd-42");
                assert_eq!(command_type, "scrape-profiles");
                assert_eq!(payload["companyName"], "Acme");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_echo_deserialize() {
        let raw = r#"{"action": "heartbeat", "echo": true}"#;
        let msg: Inbound = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, Inbound::Heartbeat { echo: true });
    }

    #[test]
    fn test_execute_missing_payload_defaults_to_null() {
        let raw = r#"{"action": "execute", "commandId": "c", "type": "t"}"#;
        let msg: Inbound = serde_json::from_str(raw).unwrap();
        match msg {
            Inbound::Execute { payload, .. } => assert!(payload.is_null()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_error_envelope_serialize() {
        let msg = Outbound::Error {
            command_id: "cmd-1".to_string(),
            code: "UNKNOWN_COMMAND".to_string(),
            message: "Unknown command type: frobnicate".to_string(),
            details: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["action"], "error");
        assert_eq!(value["commandId"], "cmd-1");
        assert_eq!(value["code"], "UNKNOWN_COMMAND");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_progress_envelope_serialize() {
        let msg = Outbound::Progress {
            command_id: "cmd-9".to_string(),
            step: 3,
            total: 10,
            message: "page 3".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "progress",
                "commandId": "cmd-9",
                "step": 3,
                "total": 10,
                "message": "page 3"
            })
        );
    }

    #[test]
    fn test_heartbeat_carries_timestamp() {
        let value = serde_json::to_value(Outbound::heartbeat()).unwrap();
        assert_eq!(value["action"], "heartbeat");
        assert!(value["ts"].as_i64().unwrap() > 0);
    }
}
