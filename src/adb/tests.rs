// Tests for the transport boundary
// Focus: error classification, fake transport framing

#[cfg(test)]
mod error_tests {
    use super::super::error::{AdbError, TimeoutKind, is_disconnect_error};
    use std::time::Duration;

    fn request_failed(message: &str) -> adb_client::RustADBError {
        adb_client::RustADBError::ADBRequestFailed(message.to_string())
    }

    #[test]
    fn test_desync_is_detected_from_clse() {
        let err = AdbError::from_adb_error_with_desync_check(
            "emulator-5554",
            "shell".to_string(),
            request_failed("unexpected CLSE packet"),
        );
        assert!(matches!(err, AdbError::ProtocolDesync { .. }));
        assert!(err.is_protocol_desync());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_disconnect_becomes_unreachable() {
        let err = AdbError::from_adb_error_with_desync_check(
            "emulator-5554",
            "push".to_string(),
            request_failed("device offline"),
        );
        match &err {
            AdbError::TransportUnreachable { serial, .. } => assert_eq!(serial, "emulator-5554"),
            other => panic!("expected unreachable, got {other:?}"),
        }
        assert!(err.is_retryable());
        assert!(!err.is_protocol_desync());
    }

    #[test]
    fn test_other_transport_errors_keep_source() {
        let err = AdbError::from_adb_error_with_desync_check(
            "emulator-5554",
            "pull".to_string(),
            request_failed("permission denied"),
        );
        assert!(matches!(err, AdbError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_disconnect_strings() {
        assert!(is_disconnect_error("error: device 'abc' not found"));
        assert!(is_disconnect_error("Connection reset by peer"));
        assert!(is_disconnect_error("Broken pipe"));
        assert!(!is_disconnect_error("permission denied"));
    }

    #[test]
    fn test_device_reported_failures_are_final() {
        let failed = AdbError::CommandFailed {
            command: "ls /nope".to_string(),
            status: Some(2),
            output: "No such file".to_string(),
        };
        assert!(!failed.is_retryable());
        assert_eq!(failed.status(), Some(2));
        assert!(failed.to_string().contains("status 2"));

        let missing = AdbError::CommandFailed {
            command: "ls".to_string(),
            status: None,
            output: String::new(),
        };
        assert_eq!(missing.status(), None);
        assert!(missing.to_string().contains("<missing>"));

        let unexpected = AdbError::UnexpectedOutput {
            command: "getprop".to_string(),
            output: vec!["a".to_string(), "b".to_string()],
        };
        assert!(!unexpected.is_retryable());
    }

    #[test]
    fn test_timeouts_are_not_retried() {
        let io = AdbError::Timeout {
            kind: TimeoutKind::Io,
            duration: Duration::from_secs(3),
            description: "shell 'ls'".to_string(),
        };
        assert!(io.is_timeout());
        assert!(!io.is_retryable());
        assert!(io.to_string().starts_with("I/O timed out"));

        let wait = AdbError::Timeout {
            kind: TimeoutKind::Condition,
            duration: Duration::from_secs(1),
            description: "boot".to_string(),
        };
        assert!(wait.to_string().starts_with("condition wait timed out"));
    }
}

#[cfg(test)]
mod fake_transport_tests {
    use super::super::fake::{FakeTransport, Reply};
    use super::super::types::{Device, Transport};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_status_marker_is_appended() {
        let fake = FakeTransport::new(|cmd| match cmd {
            "true" => Reply::ok("hi\n"),
            _ => Reply::status("", 1),
        });
        assert_eq!(fake.shell("( true );echo %$?").await.unwrap(), "hi\n%0");
        assert_eq!(fake.shell("( false );echo %$?").await.unwrap(), "%1");
        assert_eq!(fake.shell("true").await.unwrap(), "hi\n");
        assert_eq!(fake.commands(), vec!["true", "false", "true"]);
    }

    #[tokio::test]
    async fn test_redirect_lands_in_file() {
        let fake = FakeTransport::new(|_| Reply::ok("big output"));
        let out = fake.shell("( ( cat x )>/data/local/tmp/o 2>&1 );echo %$?").await.unwrap();
        assert_eq!(out, "%0");
        assert_eq!(fake.file("/data/local/tmp/o").as_deref(), Some("big output"));
    }

    #[tokio::test]
    async fn test_push_pull_and_reconnect() {
        let fake = FakeTransport::new(|_| Reply::ok(""));
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt");
        std::fs::write(&src, "payload").unwrap();

        fake.push(&src, "/sdcard/in.txt").await.unwrap();
        let dst = dir.path().join("out.txt");
        fake.pull("/sdcard/in.txt", &dst).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "payload");
        assert!(fake.pull("/sdcard/none", &dst).await.is_err());

        fake.reconnect().await.unwrap();
        assert_eq!(fake.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(fake.serial(), "emulator-5554");
    }

    #[test]
    fn test_device_ready_state() {
        let ready = Device {
            name: "emulator-5554".to_string(),
            state: "device".to_string(),
        };
        let offline = Device {
            name: "R58M".to_string(),
            state: "offline".to_string(),
        };
        assert!(ready.is_ready());
        assert!(!offline.is_ready());
    }
}
