use super::*;

#[test]
fn test_allows_under_limit() {
    let limiter = ToolCallLimiter::new(RateLimitConfig::per_minute(5));
    for i in 0..5 {
        let result = limiter.acquire();
        assert!(result.allowed);
        assert_eq!(result.remaining, 4 - i);
    }
}

#[test]
fn test_denies_over_limit() {
    let limiter = ToolCallLimiter::new(RateLimitConfig::per_minute(3));
    for _ in 0..3 {
        assert!(limiter.acquire().allowed);
    }

    let result = limiter.acquire();
    assert!(!result.allowed);
    assert_eq!(result.remaining, 0);
    assert_eq!(result.current, 3);
    assert!(result.reset_after <= Duration::from_secs(60));
}

#[test]
fn test_window_slides() {
    let limiter = ToolCallLimiter::new(RateLimitConfig::new(2, Duration::from_secs(10)));
    let start = Instant::now();
    assert!(limiter.acquire_at(start).allowed);
    assert!(limiter.acquire_at(start + Duration::from_secs(5)).allowed);
    assert!(!limiter.acquire_at(start + Duration::from_secs(6)).allowed);

    // The first request has left the window.
    let later = limiter.acquire_at(start + Duration::from_secs(11));
    assert!(later.allowed);
    assert_eq!(later.current, 2);
}

#[test]
fn test_window_is_shared_by_all_callers() {
    let limiter = std::sync::Arc::new(ToolCallLimiter::new(RateLimitConfig::per_minute(4)));
    let workers: Vec<_> = (0..2)
        .map(|_| {
            let limiter = std::sync::Arc::clone(&limiter);
            std::thread::spawn(move || limiter.acquire().allowed && limiter.acquire().allowed)
        })
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap());
    }

    let denied = limiter.acquire();
    assert!(!denied.allowed);
    assert_eq!(denied.current, 4);
}

#[test]
fn test_default_is_500_per_minute() {
    let limiter = ToolCallLimiter::default();
    assert_eq!(limiter.config().max_requests, 500);
    assert_eq!(limiter.config().window, Duration::from_secs(60));
}
