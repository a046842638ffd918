//! Capability authorization against the OS permission broker.
//!
//! `ensure` may prompt (interactive mode); `status` is strictly read-only
//! and never triggers a dialog. Nothing here is cached: the broker calls in
//! fresh for every authorization decision, and the permission watcher polls
//! `status` for UI observers.

use std::collections::BTreeSet;

use async_trait::async_trait;

use clawdis_ipc::{Capability, PermissionSnapshot};

/// Authorization state of one capability as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted,
    Denied,
    NotDetermined,
}

/// Decision point for capability grants.
#[async_trait]
pub trait CapabilityAuthorizer: Send + Sync {
    /// Check the given capabilities, prompting where `interactive` allows.
    ///
    /// Dialog-backed capabilities (see [`Capability::supports_request`]) get
    /// an OS prompt from `notDetermined`; the settings-pane capabilities can
    /// only be nudged by opening the relevant pane. Always returns a full
    /// map for the requested set.
    async fn ensure(
        &self,
        capabilities: &BTreeSet<Capability>,
        interactive: bool,
    ) -> PermissionSnapshot;

    /// Read-only view of the current grants. Never prompts.
    async fn status(&self, capabilities: &[Capability]) -> anyhow::Result<PermissionSnapshot>;
}

/// Authorizer backed by the host OS.
///
/// On macOS this talks to the TCC-mediated APIs (screen capture preflight,
/// accessibility trust, notification/microphone/speech authorization). On
/// platforms without such a broker every capability reports as granted and
/// prompting is a no-op.
#[derive(Debug, Default)]
pub struct HostAuthorizer;

impl HostAuthorizer {
    pub fn new() -> Self {
        HostAuthorizer
    }
}

#[async_trait]
impl CapabilityAuthorizer for HostAuthorizer {
    async fn ensure(
        &self,
        capabilities: &BTreeSet<Capability>,
        interactive: bool,
    ) -> PermissionSnapshot {
        let mut results = PermissionSnapshot::new();
        for cap in capabilities {
            results.insert(*cap, host::ensure_one(*cap, interactive).await);
        }
        results
    }

    async fn status(&self, capabilities: &[Capability]) -> anyhow::Result<PermissionSnapshot> {
        let mut results = PermissionSnapshot::new();
        for cap in capabilities {
            results.insert(*cap, host::probe_one(*cap).await);
        }
        Ok(results)
    }
}

#[cfg(target_os = "macos")]
mod host {
    use clawdis_ipc::Capability;
    use tracing::debug;

    use crate::notify::un;

    pub async fn ensure_one(cap: Capability, interactive: bool) -> bool {
        match cap {
            Capability::Notifications => {
                match un::authorization_status().await {
                    un::Status::Authorized | un::Status::Provisional | un::Status::Ephemeral => {
                        true
                    }
                    un::Status::NotDetermined if interactive => {
                        let granted = un::request_authorization().await;
                        // Re-probe: the dialog result alone does not prove the
                        // grant landed.
                        granted
                            && matches!(
                                un::authorization_status().await,
                                un::Status::Authorized | un::Status::Provisional
                            )
                    }
                    un::Status::Denied => {
                        if interactive {
                            open_settings_pane(&[
                                "x-apple.systempreferences:com.apple.Notifications-Settings.extension",
                                "x-apple.systempreferences:com.apple.preference.notifications",
                            ])
                            .await;
                        }
                        false
                    }
                    _ => false,
                }
            }

            Capability::Accessibility => {
                let trusted = accessibility::is_trusted();
                if interactive && !trusted {
                    // Fires the async OS trust prompt; the result is not
                    // awaited, matching the system API's contract.
                    accessibility::prompt();
                }
                trusted
            }

            Capability::ScreenRecording => {
                let granted = screen_recording::preflight();
                if interactive && !granted {
                    screen_recording::request();
                }
                screen_recording::preflight()
            }

            Capability::Microphone => {
                let granted = microphone::is_authorized();
                if interactive && !granted {
                    microphone::request_access().await
                } else {
                    granted
                }
            }

            Capability::SpeechRecognition => {
                let status = speech::authorization_status();
                if status == speech::NOT_DETERMINED && interactive {
                    speech::request_authorization().await
                } else {
                    status == speech::AUTHORIZED
                }
            }
        }
    }

    pub async fn probe_one(cap: Capability) -> bool {
        match cap {
            Capability::Notifications => matches!(
                un::authorization_status().await,
                un::Status::Authorized | un::Status::Provisional
            ),
            Capability::Accessibility => accessibility::is_trusted(),
            Capability::ScreenRecording => screen_recording::preflight(),
            Capability::Microphone => microphone::is_authorized(),
            Capability::SpeechRecognition => {
                speech::authorization_status() == speech::AUTHORIZED
            }
        }
    }

    /// Open the first settings pane URL that launches. Best-effort; a pane
    /// that fails to open is ignored.
    async fn open_settings_pane(candidates: &[&str]) {
        for url in candidates {
            match tokio::process::Command::new("open").arg(url).status().await {
                Ok(status) if status.success() => return,
                Ok(_) | Err(_) => continue,
            }
        }
        debug!("no settings pane candidate could be opened");
    }

    mod screen_recording {
        use core_graphics::access::ScreenCaptureAccess;

        pub fn preflight() -> bool {
            ScreenCaptureAccess::default().preflight()
        }

        pub fn request() -> bool {
            ScreenCaptureAccess::default().request()
        }
    }

    mod accessibility {
        use std::ffi::c_void;

        #[link(name = "ApplicationServices", kind = "framework")]
        extern "C" {
            fn AXIsProcessTrusted() -> bool;
            fn AXIsProcessTrustedWithOptions(options: *const c_void) -> bool;
        }

        pub fn is_trusted() -> bool {
            unsafe { AXIsProcessTrusted() }
        }

        /// Triggers the OS trust prompt without waiting for the outcome.
        pub fn prompt() {
            unsafe {
                let _ = AXIsProcessTrustedWithOptions(std::ptr::null());
            }
        }
    }

    mod microphone {
        use std::sync::Mutex;

        use block::ConcreteBlock;
        use objc::runtime::{Object, BOOL, NO};
        use objc::{class, msg_send, sel, sel_impl};
        use tokio::sync::oneshot;

        #[link(name = "AVFoundation", kind = "framework")]
        extern "C" {
            static AVMediaTypeAudio: *mut Object;
        }

        // AVAuthorizationStatus.authorized
        const AUTHORIZED: i64 = 3;

        pub fn is_authorized() -> bool {
            let raw: i64 = unsafe {
                msg_send![class!(AVCaptureDevice), authorizationStatusForMediaType: AVMediaTypeAudio]
            };
            raw == AUTHORIZED
        }

        fn fire_request() -> oneshot::Receiver<bool> {
            let (tx, rx) = oneshot::channel();
            let tx = Mutex::new(Some(tx));
            let handler = ConcreteBlock::new(move |granted: BOOL| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(granted != NO);
                }
            })
            .copy();

            unsafe {
                let _: () = msg_send![class!(AVCaptureDevice), requestAccessForMediaType: AVMediaTypeAudio
                                                                      completionHandler: &*handler];
            }
            rx
        }

        pub async fn request_access() -> bool {
            fire_request().await.unwrap_or(false)
        }
    }

    mod speech {
        use std::sync::Mutex;

        use block::ConcreteBlock;
        use objc::{class, msg_send, sel, sel_impl};
        use tokio::sync::oneshot;

        #[link(name = "Speech", kind = "framework")]
        extern "C" {}

        // SFSpeechRecognizerAuthorizationStatus
        pub const NOT_DETERMINED: i64 = 0;
        pub const AUTHORIZED: i64 = 3;

        pub fn authorization_status() -> i64 {
            unsafe { msg_send![class!(SFSpeechRecognizer), authorizationStatus] }
        }

        fn fire_request() -> oneshot::Receiver<bool> {
            let (tx, rx) = oneshot::channel();
            let tx = Mutex::new(Some(tx));
            let handler = ConcreteBlock::new(move |status: i64| {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(status == AUTHORIZED);
                }
            })
            .copy();

            unsafe {
                let _: () = msg_send![class!(SFSpeechRecognizer), requestAuthorization: &*handler];
            }
            rx
        }

        pub async fn request_authorization() -> bool {
            fire_request().await.unwrap_or(false)
        }
    }
}

#[cfg(not(target_os = "macos"))]
mod host {
    use clawdis_ipc::Capability;

    // No TCC equivalent: grants are implicit, prompting is a no-op.

    pub async fn ensure_one(_cap: Capability, _interactive: bool) -> bool {
        true
    }

    pub async fn probe_one(_cap: Capability) -> bool {
        true
    }
}

/// Authorizer with a fixed grant table. Used by tests and by headless
/// deployments that manage grants out-of-band.
pub struct StaticAuthorizer {
    grants: std::sync::Mutex<std::collections::BTreeMap<Capability, Grant>>,
    prompts: std::sync::atomic::AtomicUsize,
    status_calls: std::sync::atomic::AtomicUsize,
    fail_status: std::sync::atomic::AtomicBool,
}

impl StaticAuthorizer {
    pub fn new(grants: impl IntoIterator<Item = (Capability, Grant)>) -> Self {
        StaticAuthorizer {
            grants: std::sync::Mutex::new(grants.into_iter().collect()),
            prompts: std::sync::atomic::AtomicUsize::new(0),
            status_calls: std::sync::atomic::AtomicUsize::new(0),
            fail_status: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Every capability granted.
    pub fn granting_all() -> Self {
        Self::new(Capability::ALL.map(|cap| (cap, Grant::Granted)))
    }

    /// Every capability denied.
    pub fn denying_all() -> Self {
        Self::new(Capability::ALL.map(|cap| (cap, Grant::Denied)))
    }

    pub fn set(&self, cap: Capability, grant: Grant) {
        self.grants.lock().unwrap().insert(cap, grant);
    }

    /// Number of OS prompts a real authorizer would have shown.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Make subsequent `status` calls fail, for probe-failure tests.
    pub fn set_status_failing(&self, failing: bool) {
        self.fail_status
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl CapabilityAuthorizer for StaticAuthorizer {
    async fn ensure(
        &self,
        capabilities: &BTreeSet<Capability>,
        interactive: bool,
    ) -> PermissionSnapshot {
        let mut grants = self.grants.lock().unwrap();
        let mut results = PermissionSnapshot::new();
        for cap in capabilities {
            let grant = grants.get(cap).copied().unwrap_or(Grant::NotDetermined);
            let granted = match grant {
                Grant::Granted => true,
                Grant::NotDetermined if interactive && cap.supports_request() => {
                    self.prompts
                        .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    grants.insert(*cap, Grant::Granted);
                    true
                }
                _ => false,
            };
            results.insert(*cap, granted);
        }
        results
    }

    async fn status(&self, capabilities: &[Capability]) -> anyhow::Result<PermissionSnapshot> {
        self.status_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail_status.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("permission probe failed");
        }

        let grants = self.grants.lock().unwrap();
        Ok(capabilities
            .iter()
            .map(|cap| {
                let granted =
                    matches!(grants.get(cap).copied().unwrap_or(Grant::NotDetermined), Grant::Granted);
                (*cap, granted)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_never_prompts() {
        let authorizer = StaticAuthorizer::new(
            Capability::ALL.map(|cap| (cap, Grant::NotDetermined)),
        );
        let snapshot = authorizer.status(&Capability::ALL).await.unwrap();
        assert!(snapshot.values().all(|granted| !granted));
        assert_eq!(authorizer.prompt_count(), 0);
    }

    #[tokio::test]
    async fn interactive_ensure_prompts_only_dialog_capabilities() {
        let authorizer = StaticAuthorizer::new(
            Capability::ALL.map(|cap| (cap, Grant::NotDetermined)),
        );
        let caps: BTreeSet<_> = Capability::ALL.into_iter().collect();
        let results = authorizer.ensure(&caps, true).await;

        assert!(results[&Capability::Notifications]);
        assert!(results[&Capability::Microphone]);
        assert!(results[&Capability::SpeechRecognition]);
        // Settings-pane capabilities cannot be granted by a dialog.
        assert!(!results[&Capability::Accessibility]);
        assert!(!results[&Capability::ScreenRecording]);
        assert_eq!(authorizer.prompt_count(), 3);
    }

    #[tokio::test]
    async fn non_interactive_ensure_never_promotes() {
        let authorizer = StaticAuthorizer::new(
            Capability::ALL.map(|cap| (cap, Grant::NotDetermined)),
        );
        let caps: BTreeSet<_> = Capability::ALL.into_iter().collect();
        let results = authorizer.ensure(&caps, false).await;
        assert!(results.values().all(|granted| !granted));
        assert_eq!(authorizer.prompt_count(), 0);
    }

    #[tokio::test]
    async fn denied_stays_denied_even_interactively() {
        let authorizer = StaticAuthorizer::denying_all();
        let caps: BTreeSet<_> = [Capability::Notifications].into_iter().collect();
        let results = authorizer.ensure(&caps, true).await;
        assert!(!results[&Capability::Notifications]);
        assert_eq!(authorizer.prompt_count(), 0);
    }
}
