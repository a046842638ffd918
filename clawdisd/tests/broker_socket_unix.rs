#![cfg(unix)]

use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clawdisd_client::ClawdisClient;
use tokio::process::Command;
use tokio::time::sleep;

fn find_clawdisd_binary() -> PathBuf {
    let exe = std::env::current_exe().expect("current_exe");
    // target/debug/deps/<test-bin>
    let target_dir = exe
        .parent()
        .and_then(|p| p.parent())
        .expect("target debug dir");
    let candidate = target_dir.join("clawdisd");
    if candidate.is_file() {
        return candidate;
    }
    // Fallback to workspace target
    target_dir
        .parent()
        .map(|p| p.join("debug").join("clawdisd"))
        .unwrap_or(candidate)
}

fn unique(name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}-{}-{}", name, std::process::id(), millis)
}

struct Daemon {
    child: tokio::process::Child,
    sock: String,
    settings_path: PathBuf,
}

impl Daemon {
    async fn spawn() -> Self {
        let sock = format!("/tmp/{}.sock", unique("clawdisd-test"));
        let settings_path = PathBuf::from(format!("/tmp/{}.toml", unique("clawdis-settings")));
        fs::write(&settings_path, "pause_enabled = false\n").expect("write settings");

        let child = Command::new(find_clawdisd_binary())
            .arg("--socket")
            .arg(&sock)
            .arg("--settings")
            .arg(&settings_path)
            .arg("--debug")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn clawdisd");

        let daemon = Daemon {
            child,
            sock,
            settings_path,
        };

        // Wait until the daemon accepts connections
        let client = daemon.client();
        let mut ready = false;
        for _ in 0..50 {
            // up to ~5s
            if client.status().await.is_ok() {
                ready = true;
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        assert!(ready, "daemon should accept connections");
        daemon
    }

    fn client(&self) -> ClawdisClient {
        ClawdisClient::with_reply_timeout(&self.sock, Duration::from_secs(10))
    }

    fn set_paused(&self, paused: bool) {
        fs::write(
            &self.settings_path,
            format!("pause_enabled = {paused}\n"),
        )
        .expect("rewrite settings");
    }

    async fn stop(mut self) {
        let _ = self.child.kill().await;
        let _ = fs::remove_file(&self.settings_path);
    }
}

#[tokio::test]
async fn status_reports_ready() {
    let daemon = Daemon::spawn().await;
    let response = daemon.client().status().await.expect("status");
    assert!(response.ok);
    assert_eq!(response.message.as_deref(), Some("ready"));
    daemon.stop().await;
}

#[tokio::test]
async fn shell_commands_run_end_to_end() {
    let daemon = Daemon::spawn().await;
    let client = daemon.client();

    let response = client
        .run_shell(
            vec!["sh".into(), "-c".into(), "echo end-to-end".into()],
            None,
            None,
            Some(10.0),
            false,
        )
        .await
        .expect("run echo");
    assert!(response.ok);
    assert_eq!(response.payload.as_deref(), Some(&b"end-to-end\n"[..]));

    let response = client
        .run_shell(vec!["false".into()], None, None, None, false)
        .await
        .expect("run false");
    assert!(!response.ok);
    assert_eq!(response.message.as_deref(), Some("exit 1"));

    let response = client
        .run_shell(vec![], None, None, None, false)
        .await
        .expect("run empty");
    assert!(!response.ok);
    assert_eq!(response.message.as_deref(), Some("empty command"));

    daemon.stop().await;
}

#[tokio::test]
async fn one_connection_can_pipeline_requests() {
    use clawdis_ipc::wire::{decode_response, encode_request, read_frame, write_frame};
    use clawdis_ipc::Request;

    let daemon = Daemon::spawn().await;
    let mut stream = tokio::net::UnixStream::connect(&daemon.sock)
        .await
        .expect("connect");

    for _ in 0..3 {
        let body = encode_request(&Request::Status).expect("encode");
        write_frame(&mut stream, &body).await.expect("write");
        let frame = read_frame(&mut stream)
            .await
            .expect("read")
            .expect("frame");
        let response = decode_response(&frame).expect("decode");
        assert!(response.ok);
        assert_eq!(response.message.as_deref(), Some("ready"));
    }

    daemon.stop().await;
}

#[tokio::test]
async fn pause_takes_effect_without_restart() {
    let daemon = Daemon::spawn().await;
    let client = daemon.client();

    let response = client
        .run_shell(vec!["true".into()], None, None, None, false)
        .await
        .expect("run before pause");
    assert!(response.ok);

    daemon.set_paused(true);

    let response = client
        .run_shell(vec!["true".into()], None, None, None, false)
        .await
        .expect("run while paused");
    assert!(!response.ok);
    assert_eq!(response.message.as_deref(), Some("clawdis paused"));

    // The liveness probe still answers.
    let response = client.status().await.expect("status while paused");
    assert!(response.ok);
    assert_eq!(response.message.as_deref(), Some("ready"));

    daemon.set_paused(false);
    let response = client
        .run_shell(vec!["true".into()], None, None, None, false)
        .await
        .expect("run after unpause");
    assert!(response.ok);

    daemon.stop().await;
}
