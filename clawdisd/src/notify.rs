//! One-shot desktop alerts.
//!
//! The dispatcher verifies (and, from `notDetermined`, requests) the alert
//! permission before posting. A `false` return means the alert was not
//! accepted by the OS, for whatever reason; the broker turns that into
//! "notification not authorized".

use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a one-shot alert. An empty `sound` means silent.
    async fn send(&self, title: &str, body: &str, sound: &str) -> bool;
}

#[derive(Debug, Default)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        DesktopNotifier
    }
}

#[cfg(target_os = "macos")]
#[async_trait]
impl Notifier for DesktopNotifier {
    async fn send(&self, title: &str, body: &str, sound: &str) -> bool {
        match un::authorization_status().await {
            un::Status::NotDetermined => {
                if !un::request_authorization().await {
                    return false;
                }
            }
            un::Status::Authorized | un::Status::Provisional | un::Status::Ephemeral => {}
            un::Status::Denied => return false,
        }

        un::post(title, body, sound).await
    }
}

#[cfg(not(target_os = "macos"))]
#[async_trait]
impl Notifier for DesktopNotifier {
    async fn send(&self, title: &str, body: &str, _sound: &str) -> bool {
        // notify-send has no sound parameter; alerts are silent here.
        match tokio::process::Command::new("notify-send")
            .arg(title)
            .arg(body)
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(err) => {
                tracing::warn!("failed to run notify-send: {err}");
                false
            }
        }
    }
}

/// Bindings to the UserNotifications authorization and delivery calls.
/// Shared with the capability authorizer, which gates on the same status.
#[cfg(target_os = "macos")]
pub(crate) mod un {
    use std::sync::Mutex;

    use block::ConcreteBlock;
    use cocoa::base::nil;
    use cocoa::foundation::NSString;
    use objc::runtime::{Object, BOOL, NO};
    use objc::{class, msg_send, sel, sel_impl};
    use tokio::sync::oneshot;
    use uuid::Uuid;

    #[link(name = "UserNotifications", kind = "framework")]
    extern "C" {}

    /// UNAuthorizationStatus.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Status {
        NotDetermined,
        Denied,
        Authorized,
        Provisional,
        Ephemeral,
    }

    impl Status {
        fn from_raw(raw: i64) -> Status {
            match raw {
                1 => Status::Denied,
                2 => Status::Authorized,
                3 => Status::Provisional,
                4 => Status::Ephemeral,
                _ => Status::NotDetermined,
            }
        }
    }

    fn center() -> *mut Object {
        unsafe { msg_send![class!(UNUserNotificationCenter), currentNotificationCenter] }
    }

    fn fetch_status() -> oneshot::Receiver<i64> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let handler = ConcreteBlock::new(move |settings: *mut Object| {
            let raw: i64 = unsafe { msg_send![settings, authorizationStatus] };
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(raw);
            }
        })
        .copy();

        unsafe {
            let _: () =
                msg_send![center(), getNotificationSettingsWithCompletionHandler: &*handler];
        }
        rx
    }

    pub async fn authorization_status() -> Status {
        Status::from_raw(fetch_status().await.unwrap_or(0))
    }

    fn fire_request() -> oneshot::Receiver<bool> {
        // UNAuthorizationOptions: badge | sound | alert
        const OPTIONS: u64 = 1 | 2 | 4;

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let handler = ConcreteBlock::new(move |granted: BOOL, _error: *mut Object| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(granted != NO);
            }
        })
        .copy();

        unsafe {
            let _: () = msg_send![center(), requestAuthorizationWithOptions: OPTIONS
                                                        completionHandler: &*handler];
        }
        rx
    }

    pub async fn request_authorization() -> bool {
        fire_request().await.unwrap_or(false)
    }

    fn fire_post(title: &str, body: &str, sound: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let handler = ConcreteBlock::new(move |error: *mut Object| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(error.is_null());
            }
        })
        .copy();

        let identifier = Uuid::new_v4().to_string();
        unsafe {
            let content: *mut Object = msg_send![class!(UNMutableNotificationContent), new];
            let _: () = msg_send![content, setTitle: NSString::alloc(nil).init_str(title)];
            let _: () = msg_send![content, setBody: NSString::alloc(nil).init_str(body)];
            if !sound.is_empty() {
                let name = NSString::alloc(nil).init_str(sound);
                let sound_obj: *mut Object =
                    msg_send![class!(UNNotificationSound), soundNamed: name];
                let _: () = msg_send![content, setSound: sound_obj];
            }

            let ident = NSString::alloc(nil).init_str(&identifier);
            let request: *mut Object = msg_send![class!(UNNotificationRequest), requestWithIdentifier: ident
                                                                                            content: content
                                                                                            trigger: nil];
            let _: () = msg_send![center(), addNotificationRequest: request
                                              withCompletionHandler: &*handler];
        }
        rx
    }

    /// Deliver one alert; true iff the center accepted it.
    pub async fn post(title: &str, body: &str, sound: &str) -> bool {
        fire_post(title, body, sound).await.unwrap_or(false)
    }
}
