use super::*;

#[tokio::test]
async fn test_request_cancels_tokens() {
    let controller = ShutdownController::new();
    let token = controller.token();
    assert!(!token.is_cancelled());

    controller.request(ShutdownReason::HttpRequest);

    assert!(token.is_cancelled());
    assert!(controller.is_shutting_down());
    controller.cancelled().await;
}

#[test]
fn test_first_reason_wins() {
    let controller = ShutdownController::new();
    controller.request(ShutdownReason::Terminate);
    controller.request(ShutdownReason::HttpRequest);
    assert_eq!(controller.reason(), Some(ShutdownReason::Terminate));
    assert_eq!(controller.reason().map(|r| r.as_str()), Some("sigterm"));
}

#[test]
fn test_request_guard() {
    let controller = ShutdownController::new();
    {
        let _a = controller.register_request();
        let _b = controller.register_request();
        assert_eq!(controller.active_requests(), 2);
    }
    assert_eq!(controller.active_requests(), 0);
}

#[tokio::test]
async fn test_drain_waits_for_requests() {
    let controller = ShutdownController::with_drain_timeout(Duration::from_secs(2));
    let worker = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let _guard = controller.register_request();
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    controller.request(ShutdownReason::Interrupt);
    controller.drain().await;

    assert_eq!(controller.active_requests(), 0);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_drain_gives_up_after_timeout() {
    let controller = ShutdownController::with_drain_timeout(Duration::from_millis(60));
    let _stuck = controller.register_request();

    let started = std::time::Instant::now();
    controller.drain().await;

    assert!(started.elapsed() >= Duration::from_millis(60));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(controller.active_requests(), 1);

    // A second drain returns at once.
    let again = std::time::Instant::now();
    controller.drain().await;
    assert!(again.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_default_drain_timeout() {
    let controller = ShutdownController::new();
    assert_eq!(controller.drain_timeout(), DEFAULT_DRAIN_TIMEOUT);
    let custom = ShutdownController::with_drain_timeout(Duration::from_millis(250));
    assert_eq!(custom.drain_timeout(), Duration::from_millis(250));
}
