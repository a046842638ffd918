//! The action broker: decode, gate, dispatch, encode.
//!
//! `handle` never fails across the boundary. Decode errors, pause
//! rejections, missing grants, and execution failures all come back as a
//! serialized `Response { ok: false, message }`.

use std::collections::BTreeSet;
use std::sync::Arc;

use clawdis_ipc::wire::{decode_request, encode_response};
use clawdis_ipc::{Capability, Request, Response};
use tracing::{debug, warn};

use crate::authorizer::CapabilityAuthorizer;
use crate::capture::Capturer;
use crate::exec::ProcessExecutor;
use crate::notify::Notifier;
use crate::settings::SettingsStore;

pub struct ActionBroker {
    settings: Arc<dyn SettingsStore>,
    authorizer: Arc<dyn CapabilityAuthorizer>,
    notifier: Arc<dyn Notifier>,
    capturer: Arc<dyn Capturer>,
    executor: ProcessExecutor,
}

impl ActionBroker {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        authorizer: Arc<dyn CapabilityAuthorizer>,
        notifier: Arc<dyn Notifier>,
        capturer: Arc<dyn Capturer>,
    ) -> Self {
        ActionBroker {
            settings,
            authorizer,
            notifier,
            capturer,
            executor: ProcessExecutor::new(),
        }
    }

    /// Handle one serialized request and produce the serialized reply.
    pub async fn handle(&self, raw: &[u8]) -> Vec<u8> {
        let response = match decode_request(raw) {
            Ok(request) => self.process(request).await,
            Err(err) => {
                warn!("failed to decode request: {err}");
                Response::failure(format!("decode/handle error: {err}"))
            }
        };

        encode_response(&response).unwrap_or_else(|err| {
            warn!("failed to encode response: {err}");
            br#"{"ok":false,"message":"encode error"}"#.to_vec()
        })
    }

    async fn process(&self, request: Request) -> Response {
        // The status probe reports reachability even while paused.
        if matches!(request, Request::Status) {
            return Response::success_with_message("ready");
        }

        if self.settings.current().pause_enabled {
            debug!("rejecting request while paused");
            return Response::failure("clawdis paused");
        }

        match request {
            Request::Status => unreachable!("handled above"),

            Request::Notify { title, body, sound } => {
                let sound = sound.unwrap_or_else(|| self.settings.current().default_sound);
                if self.notifier.send(&title, &body, &sound).await {
                    Response::success()
                } else {
                    Response::failure("notification not authorized")
                }
            }

            Request::EnsurePermissions {
                capabilities,
                interactive,
            } => {
                let statuses = self.authorizer.ensure(&capabilities, interactive).await;
                let missing: Vec<&str> = statuses
                    .iter()
                    .filter(|(_, granted)| !**granted)
                    .map(|(cap, _)| cap.as_str())
                    .collect();
                if missing.is_empty() {
                    Response::success_with_message("all granted")
                } else {
                    Response::failure(format!("missing: {}", missing.join(",")))
                }
            }

            Request::Screenshot {
                display_id,
                window_id,
            } => {
                if !self.screen_recording_granted().await {
                    return Response::failure("screen recording permission missing");
                }
                match self.capturer.capture(display_id, window_id).await {
                    Some(png) => Response::success_with_payload(png),
                    None => Response::failure("screenshot failed"),
                }
            }

            Request::RunShell {
                command,
                cwd,
                env,
                timeout_seconds,
                needs_screen_capture_permission,
            } => {
                if needs_screen_capture_permission && !self.screen_recording_granted().await {
                    return Response::failure("screen recording permission missing");
                }
                self.executor
                    .run(&command, cwd.as_deref(), env.as_ref(), timeout_seconds)
                    .await
            }
        }
    }

    async fn screen_recording_granted(&self) -> bool {
        let caps: BTreeSet<Capability> = [Capability::ScreenRecording].into_iter().collect();
        let statuses = self.authorizer.ensure(&caps, false).await;
        statuses
            .get(&Capability::ScreenRecording)
            .copied()
            .unwrap_or(false)
    }
}
