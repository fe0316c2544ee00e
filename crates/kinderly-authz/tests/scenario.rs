//! End-to-end lifecycle: warmup, change-driven refresh, store outage.

use std::sync::Arc;
use std::time::Duration;

use kinderly_authz::{
    AuthzConfig, ChangeEntity, ChangeEvent, ChangeKind, ChangeLog, ChangeNotifier,
    MemoryRouteStore, RouteBinding, RouteCache, RouteWatcher, UserContext, authorize_request,
    evaluate,
};

fn binding(id: &str, role: &str, method: &str, pattern: &str) -> RouteBinding {
    RouteBinding {
        id: id.to_string(),
        role_code: role.to_string(),
        method: method.to_string(),
        path_pattern: pattern.to_string(),
        permission_code: None,
        active: true,
    }
}

fn seed_bindings() -> Vec<RouteBinding> {
    let patterns = [
        "/api/students",
        "/api/students/:id",
        "/api/classes",
        "/api/classes/:id",
        "/api/attendance",
        "/api/attendance/:id",
        "/api/meals",
        "/api/notices",
        "/api/notices/:id",
        "/api/parents/messages",
    ];
    patterns
        .iter()
        .enumerate()
        .map(|(i, p)| binding(&format!("b{i}"), "teacher", "GET", p))
        .collect()
}

struct System {
    store: Arc<MemoryRouteStore>,
    cache: Arc<RouteCache>,
    notifier: Arc<ChangeNotifier>,
    watcher: Arc<RouteWatcher>,
}

fn system() -> System {
    let config = AuthzConfig::for_testing();
    let store = Arc::new(MemoryRouteStore::with_bindings(seed_bindings()));
    let cache = Arc::new(RouteCache::new(store.clone(), &config));
    let notifier = Arc::new(ChangeNotifier::new(config.notifier_capacity));
    let log = Arc::new(ChangeLog::new(config.change_log_capacity));
    let watcher = Arc::new(RouteWatcher::new(
        cache.clone(),
        notifier.clone(),
        log,
        &config,
    ));
    System {
        store,
        cache,
        notifier,
        watcher,
    }
}

fn teacher() -> UserContext {
    UserContext {
        user_id: "u1".to_string(),
        roles: vec!["teacher".to_string()],
        permissions: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_lifecycle() {
    let sys = system();

    // Before warmup: fail-closed, nothing is authorized
    assert!(authorize_request(&sys.cache, Some(&teacher()), "GET", "/api/students").is_err());

    // Warmup loads the seeded bindings
    let outcome = sys.cache.warmup().await.unwrap();
    assert_eq!(outcome.version, 1);
    assert_eq!(outcome.route_count, 10);
    assert!(sys.cache.status().is_healthy);
    assert!(authorize_request(&sys.cache, Some(&teacher()), "GET", "/api/students/42").is_ok());

    // A burst of three permission edits collapses into a single rebuild
    sys.watcher.start();
    tokio::time::sleep(Duration::from_millis(5)).await;

    sys.store
        .upsert(binding("b10", "parent", "GET", "/api/parents/messages"))
        .await;
    for i in 0..3 {
        sys.notifier.notify(ChangeEvent::now(
            ChangeKind::Updated,
            ChangeEntity::RouteBinding,
            format!("b1{i}"),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = sys.cache.status();
    assert_eq!(status.version, 2);
    assert_eq!(sys.store.query_count(), 2); // warmup + one debounced rebuild
    assert_eq!(sys.watcher.status().event_count, 3);

    let parent = UserContext {
        user_id: "u2".to_string(),
        roles: vec!["parent".to_string()],
        permissions: Vec::new(),
    };
    assert!(authorize_request(&sys.cache, Some(&parent), "GET", "/api/parents/messages").is_ok());

    // Store outage during a forced refresh: the old snapshot keeps serving
    sys.store.fail_next(1);
    assert!(sys.watcher.force_refresh().await.is_err());

    let status = sys.cache.status();
    assert_eq!(status.version, 2);
    assert!(status.is_healthy);
    assert_eq!(sys.cache.metrics().error_count, 1);
    assert!(authorize_request(&sys.cache, Some(&teacher()), "GET", "/api/students").is_ok());

    // The failure shows up in the health score: 100 - 10 (one error) = 90
    let report = evaluate(&status, &sys.cache.metrics());
    assert_eq!(report.score, 90);

    // Recovery: the store is back, the next refresh succeeds
    let outcome = sys.cache.refresh().await.unwrap();
    assert_eq!(outcome.version, 3);

    sys.watcher.stop();
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_failure_then_recovery() {
    let sys = system();
    sys.store.fail_next(1);

    // Failed warmup leaves the empty fail-closed snapshot in place
    assert!(sys.cache.warmup().await.is_err());
    let status = sys.cache.status();
    assert_eq!(status.version, 0);
    assert_eq!(status.route_count, 0);
    assert!(!status.is_healthy);
    assert!(authorize_request(&sys.cache, Some(&teacher()), "GET", "/api/students").is_err());

    // A change event drives the recovery rebuild
    sys.watcher.start();
    tokio::time::sleep(Duration::from_millis(5)).await;
    sys.notifier.notify(ChangeEvent::now(
        ChangeKind::Created,
        ChangeEntity::RouteBinding,
        "b0",
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = sys.cache.status();
    assert_eq!(status.version, 1);
    assert!(status.is_healthy);
    assert!(authorize_request(&sys.cache, Some(&teacher()), "GET", "/api/students").is_ok());

    sys.watcher.stop();
}
