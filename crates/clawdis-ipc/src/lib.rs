//! Clawdis IPC protocol
//!
//! Request/response types exchanged between the Clawdis daemon and its
//! clients, plus the length-framed JSON wire codec. External clients are
//! built against these tag and field names, so they are part of the
//! compatibility surface and must not be renamed.

pub mod wire;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One discrete OS-mediated permission the broker can check or request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Notifications,
    Accessibility,
    ScreenRecording,
    Microphone,
    SpeechRecognition,
}

impl Capability {
    /// Every capability, in stable order.
    pub const ALL: [Capability; 5] = [
        Capability::Notifications,
        Capability::Accessibility,
        Capability::ScreenRecording,
        Capability::Microphone,
        Capability::SpeechRecognition,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Notifications => "notifications",
            Capability::Accessibility => "accessibility",
            Capability::ScreenRecording => "screenRecording",
            Capability::Microphone => "microphone",
            Capability::SpeechRecognition => "speechRecognition",
        }
    }

    /// Whether the OS exposes a direct request dialog for this capability.
    ///
    /// Accessibility and screen recording are granted out-of-band in the
    /// system settings pane; they can only be prompted, not requested.
    pub fn supports_request(&self) -> bool {
        matches!(
            self,
            Capability::Notifications | Capability::Microphone | Capability::SpeechRecognition
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

/// Point-in-time view of capability grants, replaced wholesale on each poll.
pub type PermissionSnapshot = BTreeMap<Capability, bool>;

/// A single privileged action requested by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Post a one-shot desktop alert.
    #[serde(rename = "notify")]
    Notify {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sound: Option<String>,
    },

    /// Check (and optionally request) a set of capability grants.
    #[serde(rename = "ensurePermissions")]
    EnsurePermissions {
        capabilities: BTreeSet<Capability>,
        interactive: bool,
    },

    /// Liveness probe.
    #[serde(rename = "status")]
    Status,

    /// One-shot screen or window capture, returned as PNG bytes.
    #[serde(rename = "screenshot")]
    Screenshot {
        #[serde(rename = "displayID", default, skip_serializing_if = "Option::is_none")]
        display_id: Option<u32>,
        #[serde(rename = "windowID", default, skip_serializing_if = "Option::is_none")]
        window_id: Option<u32>,
    },

    /// Run an external command with bounded resources.
    #[serde(rename = "runShell")]
    RunShell {
        command: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        env: Option<BTreeMap<String, String>>,
        #[serde(
            rename = "timeoutSeconds",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        timeout_seconds: Option<f64>,
        #[serde(rename = "needsScreenCapturePermission", default)]
        needs_screen_capture_permission: bool,
    },
}

/// Reply to a [`Request`].
///
/// `ok == false` always carries a human-readable `message`; `payload` holds
/// screenshot or shell-output bytes and travels as base64 inside the JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub payload: Option<Vec<u8>>,
}

impl Response {
    pub fn success() -> Self {
        Response {
            ok: true,
            message: None,
            payload: None,
        }
    }

    pub fn success_with_message(message: impl Into<String>) -> Self {
        Response {
            ok: true,
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn success_with_payload(payload: Vec<u8>) -> Self {
        Response {
            ok: true,
            message: None,
            payload: Some(payload),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Response {
            ok: false,
            message: Some(message.into()),
            payload: None,
        }
    }
}

/// Serde adapter for optional binary payloads encoded as base64 strings,
/// matching how the original client encodes `Data` fields.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(text) => STANDARD
                .decode(text.as_bytes())
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_request(request: Request) {
        let encoded = wire::encode_request(&request).expect("encode request");
        let decoded = wire::decode_request(&encoded).expect("decode request");
        assert_eq!(request, decoded);
    }

    #[test]
    fn request_round_trips() {
        round_trip_request(Request::Notify {
            title: "Build done".into(),
            body: "all green".into(),
            sound: Some("Glass".into()),
        });
        round_trip_request(Request::Notify {
            title: "t".into(),
            body: "b".into(),
            sound: None,
        });
        round_trip_request(Request::EnsurePermissions {
            capabilities: [Capability::ScreenRecording, Capability::Microphone]
                .into_iter()
                .collect(),
            interactive: true,
        });
        round_trip_request(Request::Status);
        round_trip_request(Request::Screenshot {
            display_id: Some(1),
            window_id: None,
        });
        round_trip_request(Request::RunShell {
            command: vec!["echo".into(), "hi".into()],
            cwd: Some("/tmp".into()),
            env: Some([("PATH".to_string(), "/usr/bin".to_string())].into()),
            timeout_seconds: Some(1.5),
            needs_screen_capture_permission: false,
        });
    }

    #[test]
    fn response_round_trips() {
        for response in [
            Response::success(),
            Response::success_with_message("ready"),
            Response::success_with_payload(vec![0x89, 0x50, 0x4e, 0x47]),
            Response::failure("clawdis paused"),
        ] {
            let encoded = wire::encode_response(&response).expect("encode response");
            let decoded = wire::decode_response(&encoded).expect("decode response");
            assert_eq!(response, decoded);
        }
    }

    #[test]
    fn request_wire_names_are_stable() {
        let value = serde_json::to_value(Request::RunShell {
            command: vec!["true".into()],
            cwd: None,
            env: None,
            timeout_seconds: Some(2.0),
            needs_screen_capture_permission: true,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "runShell": {
                    "command": ["true"],
                    "timeoutSeconds": 2.0,
                    "needsScreenCapturePermission": true,
                }
            })
        );

        let value = serde_json::to_value(Request::Screenshot {
            display_id: Some(7),
            window_id: Some(42),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "screenshot": { "displayID": 7, "windowID": 42 } })
        );

        let value = serde_json::to_value(Request::EnsurePermissions {
            capabilities: [Capability::SpeechRecognition, Capability::Accessibility]
                .into_iter()
                .collect(),
            interactive: false,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "ensurePermissions": {
                    "capabilities": ["accessibility", "speechRecognition"],
                    "interactive": false,
                }
            })
        );

        assert_eq!(
            serde_json::to_value(Request::Status).unwrap(),
            serde_json::json!("status")
        );
    }

    #[test]
    fn response_payload_travels_as_base64() {
        let value = serde_json::to_value(Response::success_with_payload(b"hello".to_vec())).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "ok": true, "payload": "aGVsbG8=" })
        );
    }

    #[test]
    fn capability_names_match_wire_form() {
        for cap in Capability::ALL {
            let json = serde_json::to_value(cap).unwrap();
            assert_eq!(json, serde_json::json!(cap.as_str()));
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn only_dialog_capabilities_support_request() {
        assert!(Capability::Notifications.supports_request());
        assert!(Capability::Microphone.supports_request());
        assert!(Capability::SpeechRecognition.supports_request());
        assert!(!Capability::Accessibility.supports_request());
        assert!(!Capability::ScreenRecording.supports_request());
    }
}
