//! Full sessions driven through the host adapter and the controller.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::NaiveDate;
use engine_cpu::{MixWorkload, Workload};

use crate::clock::ManualClock;
use crate::notifier::testing::RecordingSurface;
use crate::wake_lock::WakeLock;
use crate::{
    HostService, MiningService, ServiceConfig, ServiceError, ServiceHost, ServiceState,
    StartDirective, StartIntent,
};

fn manual_clock(step_ns: u64) -> Arc<ManualClock> {
    let wall = NaiveDate::from_ymd_opt(2024, 6, 30)
        .and_then(|d| d.and_hms_opt(23, 59, 58))
        .unwrap();
    Arc::new(ManualClock::new(wall, step_ns))
}

fn config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        data_root: root.to_path_buf(),
        iteration_interval: Duration::ZERO,
        ..ServiceConfig::default()
    }
}

fn wait_for_worker(service: &MiningService) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !service.worker_finished() {
        assert!(Instant::now() < deadline, "worker never finished");
        thread::sleep(Duration::from_millis(5));
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn scenario_120_iterations_at_one_millisecond() {
    let tmp = tempfile::tempdir().unwrap();
    let surface = Arc::new(RecordingSurface::default());
    let service = MiningService::builder()
        .workload(Arc::new(MixWorkload::new(64)))
        .clock(manual_clock(1_000_000))
        .notification_surface(surface.clone())
        .build();
    let base = ServiceConfig {
        max_iterations: Some(120),
        ..config(tmp.path())
    };
    let mut host = ServiceHost::new(service, base);

    host.on_create();
    let directive =
        host.on_start_command(Some(StartIntent::with_pool("pool.example.com:3333")));
    assert_eq!(directive, StartDirective::Sticky);
    assert_eq!(
        host.last_intent().and_then(|i| i.pool_url.as_deref()),
        Some("pool.example.com:3333")
    );

    wait_for_worker(host.service());
    let path = host.service().log_path().unwrap().to_path_buf();
    let summary = host.service_mut().stop().unwrap();

    assert_eq!(summary.iterations, 120);
    assert_eq!(summary.refreshes, 3);
    // one publish at start plus refreshes at iterations 0, 50 and 100
    assert_eq!(surface.publish_count(), 4);
    assert_eq!(*surface.dismissed.lock().unwrap(), vec![1]);

    let lines = read_lines(&path);
    assert_eq!(lines.len(), 121);
    assert_eq!(lines[0], "Timestamp,Iteration,HashRate");
    for (n, line) in lines.iter().skip(1).enumerate() {
        let cols: Vec<&str> = line.split(',').collect();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0], "2024-06-30 23:59:58");
        assert_eq!(cols[1], n.to_string());
    }
    assert!(lines[120].ends_with(",119,1000.00"));
    assert!(path
        .to_string_lossy()
        .ends_with("experiment_data/mining_data_20240630_235958.csv"));
}

#[test]
fn stop_returns_within_bound_and_releases_wake_lock() {
    let tmp = tempfile::tempdir().unwrap();
    let mut service = MiningService::builder()
        .notification_surface(Arc::new(RecordingSurface::default()))
        .build();
    let cfg = ServiceConfig {
        iteration_interval: Duration::from_millis(100),
        ..config(tmp.path())
    };
    let stop_timeout = cfg.stop_timeout;

    service.start(cfg).unwrap();
    assert_eq!(service.state(), ServiceState::Active);
    assert!(service.wake_lock_held());
    thread::sleep(Duration::from_millis(250));

    let started = Instant::now();
    let summary = service.stop().unwrap();
    assert!(started.elapsed() < stop_timeout + Duration::from_millis(500));

    assert!(summary.iterations >= 1);
    assert_eq!(service.state(), ServiceState::Inactive);
    assert!(service.worker_finished());
    assert!(!service.wake_lock_held());

    // stopping again is a no-op
    assert!(service.stop().is_none());
}

#[test]
fn duplicate_activation_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut service = MiningService::builder()
        .notification_surface(Arc::new(RecordingSurface::default()))
        .build();

    let cfg = ServiceConfig {
        iteration_interval: Duration::from_millis(10),
        ..config(tmp.path())
    };

    service.start(cfg.clone()).unwrap();
    let first_log = service.log_path().map(Path::to_path_buf);

    let err = service.start(cfg).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::AlreadyActive {
            state: ServiceState::Active,
            ..
        }
    ));
    assert_eq!(service.log_path().map(Path::to_path_buf), first_log);

    service.stop();
    let files = fs::read_dir(tmp.path().join("experiment_data"))
        .unwrap()
        .count();
    assert_eq!(files, 1);
}

#[test]
fn host_ignores_second_start_command() {
    let tmp = tempfile::tempdir().unwrap();
    let service = MiningService::builder()
        .notification_surface(Arc::new(RecordingSurface::default()))
        .build();
    let base = ServiceConfig {
        iteration_interval: Duration::from_millis(10),
        ..config(tmp.path())
    };
    let mut host = ServiceHost::new(service, base);

    host.on_start_command(Some(StartIntent::with_pool("a:1")));
    let directive = host.on_start_command(Some(StartIntent::with_pool("b:2")));

    assert_eq!(directive, StartDirective::Sticky);
    assert_eq!(
        host.last_intent().and_then(|i| i.pool_url.as_deref()),
        Some("a:1")
    );
    host.on_destroy();
    assert_eq!(host.service().state(), ServiceState::Inactive);
}

#[test]
fn reactivation_creates_a_new_later_file() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = manual_clock(1_000);
    let mut service = MiningService::builder()
        .clock(clock.clone())
        .notification_surface(Arc::new(RecordingSurface::default()))
        .build();
    let cfg = ServiceConfig {
        max_iterations: Some(5),
        ..config(tmp.path())
    };

    service.start(cfg.clone()).unwrap();
    wait_for_worker(&service);
    let first = service.log_path().unwrap().to_path_buf();
    service.stop();
    let first_contents = fs::read_to_string(&first).unwrap();

    clock.advance_wall(Duration::from_secs(3));
    service.start(cfg).unwrap();
    wait_for_worker(&service);
    let second = service.log_path().unwrap().to_path_buf();
    service.stop();

    assert_ne!(first, second);
    assert!(second.file_name() > first.file_name());
    assert!(second
        .to_string_lossy()
        .ends_with("mining_data_20240701_000001.csv"));
    assert_eq!(fs::read_to_string(&first).unwrap(), first_contents);
    assert_eq!(read_lines(&second).len(), 6);
}

#[test]
fn log_creation_failure_is_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("occupied");
    fs::write(&blocker, b"not a directory").unwrap();

    let mut service = MiningService::builder()
        .clock(manual_clock(1_000))
        .notification_surface(Arc::new(RecordingSurface::default()))
        .build();
    let cfg = ServiceConfig {
        max_iterations: Some(10),
        ..config(&blocker)
    };

    service.start(cfg).unwrap();
    assert_eq!(service.state(), ServiceState::Active);
    assert!(service.log_path().is_none());

    wait_for_worker(&service);
    let summary = service.stop().unwrap();
    assert_eq!(summary.iterations, 10);
}

struct BrokenWakeLock;

impl WakeLock for BrokenWakeLock {
    fn acquire(&mut self, _timeout: Duration) -> Result<()> {
        anyhow::bail!("power service unavailable")
    }

    fn release(&mut self) -> Result<()> {
        anyhow::bail!("power service unavailable")
    }

    fn is_held(&self) -> bool {
        false
    }
}

#[test]
fn wake_lock_and_notification_failures_are_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let mut service = MiningService::builder()
        .clock(manual_clock(1_000))
        .wake_lock(Box::new(BrokenWakeLock))
        .notification_surface(Arc::new(RecordingSurface::failing()))
        .build();
    let cfg = ServiceConfig {
        max_iterations: Some(3),
        ..config(tmp.path())
    };

    service.start(cfg).unwrap();
    assert!(!service.wake_lock_held());
    wait_for_worker(&service);

    let summary = service.stop().unwrap();
    assert_eq!(summary.iterations, 3);
    let log = fs::read_dir(tmp.path().join("experiment_data"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert_eq!(read_lines(&log).len(), 4);
}

/// A workload that ignores the "never block" rule, to force the detach path.
struct StuckWorkload;

impl Workload for StuckWorkload {
    fn name(&self) -> &'static str {
        "stuck"
    }

    fn rounds(&self) -> u32 {
        1
    }

    fn run(&self) -> u64 {
        thread::sleep(Duration::from_millis(600));
        0
    }
}

#[test]
fn slow_worker_is_detached_after_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let mut service = MiningService::builder()
        .workload(Arc::new(StuckWorkload))
        .notification_surface(Arc::new(RecordingSurface::default()))
        .build();
    let cfg = ServiceConfig {
        stop_timeout: Duration::from_millis(50),
        ..config(tmp.path())
    };

    service.start(cfg).unwrap();
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    assert!(service.stop().is_none());
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(service.state(), ServiceState::Inactive);
    assert!(!service.wake_lock_held());

    // the detached worker still exits at its next poll
    thread::sleep(Duration::from_millis(800));
}

#[test]
fn detached_worker_leaves_dismissed_notification_and_log_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let surface = Arc::new(RecordingSurface::default());
    let mut service = MiningService::builder()
        .workload(Arc::new(StuckWorkload))
        .notification_surface(surface.clone())
        .build();
    let cfg = ServiceConfig {
        stop_timeout: Duration::from_millis(50),
        ..config(tmp.path())
    };

    service.start(cfg).unwrap();
    let log = service.log_path().unwrap().to_path_buf();
    thread::sleep(Duration::from_millis(20));
    assert!(service.stop().is_none());

    let published_at_stop = surface.publish_count();
    assert_eq!(*surface.dismissed.lock().unwrap(), vec![1]);

    // let the detached iteration 0 finish
    thread::sleep(Duration::from_millis(900));

    assert_eq!(surface.publish_count(), published_at_stop);
    assert_eq!(read_lines(&log), vec!["Timestamp,Iteration,HashRate"]);
}
