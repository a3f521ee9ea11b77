use saml2pkg_core::{CoreError, Engine, ErrorKind, LifecycleLock, RestoreStatus};
use saml2pkg_host::{FailPoint, HostPlatform, MockBackend, PackageBackend};
use saml2pkg_remote::MockSource;
use saml2pkg_schema::{latest, PkgVersion, Release, Saml2Config};
use saml2pkg_store::{InstallJournal, InstallKind, InstallState, RollbackStep, StoreLayout};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const PKG: &str = "pfSense-pkg-saml2-auth";

struct Harness {
    _dir: tempfile::TempDir,
    state: PathBuf,
    source: Arc<MockSource>,
    backend: Arc<MockBackend>,
}

impl Harness {
    fn new(installed: Option<&str>, published: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let source = Arc::new(MockSource::new());
        publish(&source, published);
        let backend = Arc::new(match installed {
            Some(v) => MockBackend::with_installed(PKG, v),
            None => MockBackend::new(PKG),
        });
        Self {
            _dir: dir,
            state,
            source,
            backend,
        }
    }

    fn engine(&self) -> Engine {
        Engine::new(
            StoreLayout::new(&self.state),
            Box::new(Arc::clone(&self.source)),
            Box::new(Arc::clone(&self.backend)),
            HostPlatform::Fixed("2.7.2-RELEASE".to_owned()),
        )
        .with_lock_timeout(Duration::from_millis(200))
    }

    fn installed(&self) -> Option<String> {
        self.backend.installed_version().unwrap()
    }
}

fn publish(source: &MockSource, versions: &[&str]) {
    let releases: Vec<Release> = versions
        .iter()
        .map(|v| {
            let url = format!("https://registry.example/{v}.pkg");
            source.add_artifact(&url, MockBackend::artifact_for(PKG, v));
            Release {
                version: PkgVersion::parse(v).unwrap(),
                release_date: "2025-02-14".to_owned(),
                platform_constraint: ">=2.7.0, <2.8".to_owned(),
                artifact_url: url,
            }
        })
        .collect();
    source.set_releases(&releases);
}

fn config(entity_id: &str) -> Saml2Config {
    Saml2Config {
        enable: true,
        idp_entity_id: entity_id.to_owned(),
        idp_metadata_url: "https://idp.example.com/metadata".to_owned(),
        sp_base_url: "https://fw.example.com".to_owned(),
        ..Saml2Config::default()
    }
}

// Configuration

#[test]
fn backup_then_restore_returns_earlier_config() {
    let h = Harness::new(None, &[]);
    let engine = h.engine();
    let first = config("urn:idp:first");
    let second = config("urn:idp:second");

    engine.save_config(&first).unwrap();
    assert!(engine.backup().unwrap());
    engine.save_config(&second).unwrap();
    assert_eq!(engine.load_config().unwrap(), second);

    assert_eq!(engine.restore().unwrap(), RestoreStatus::Success);
    assert_eq!(engine.load_config().unwrap(), first);
}

#[test]
fn restore_without_backup_leaves_config() {
    let h = Harness::new(None, &[]);
    let engine = h.engine();
    let current = config("urn:idp:only");
    engine.save_config(&current).unwrap();

    assert_eq!(engine.restore().unwrap(), RestoreStatus::NoBackup);
    assert_eq!(engine.load_config().unwrap(), current);
}

#[test]
fn invalid_config_is_rejected_before_locking() {
    let h = Harness::new(None, &[]);
    let engine = h.engine();
    let mut bad = config("urn:idp:x");
    bad.idp_metadata_url = "not a url".to_owned();

    let err = engine.save_config(&bad).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(!h.state.exists());
}

// Versions and catalog

#[test]
fn latest_orders_numerically() {
    assert_eq!(
        latest(["1.2.0", "1.10.0", "1.9.3"]).unwrap(),
        Some("1.10.0")
    );
}

#[test]
fn update_availability_follows_latest() {
    let h = Harness::new(Some("1.10.0"), &["1.2.0", "1.10.0", "1.9.3"]);
    let engine = h.engine();
    assert!(!engine.is_update_available().unwrap());

    h.backend.force_installed("1.9.3");
    assert!(engine.is_update_available().unwrap());
}

#[test]
fn corrupt_cache_reads_absent_and_refresh_overwrites() {
    let h = Harness::new(None, &["1.0.0"]);
    let engine = h.engine();
    let layout = engine.layout().clone();
    layout.initialize().unwrap();
    fs::write(layout.release_cache_file(), b"{\"fetched_at\": 3").unwrap();

    assert!(engine.cache().read_cache().is_none());
    let catalog = engine.refresh_cache().unwrap();
    assert_eq!(catalog.releases.len(), 1);
    assert_eq!(engine.cache().read_cache().unwrap(), catalog);
}

#[test]
fn unreachable_registry_is_system_error() {
    let h = Harness::new(None, &[]);
    h.source.set_document(None);
    let err = h.engine().refresh_cache().unwrap_err();
    assert!(matches!(err, CoreError::Fetch(_)));
    assert_eq!(err.kind(), ErrorKind::System);
}

#[test]
fn empty_registry_refreshes_to_empty_catalog() {
    let h = Harness::new(None, &[]);
    let catalog = h.engine().refresh_cache().unwrap();
    assert!(catalog.releases.is_empty());
}

// Installs

#[test]
fn update_then_revert() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "1.1.0"]);
    let engine = h.engine();

    let outcome = engine.update().unwrap();
    assert!(outcome.changed);
    assert_eq!(h.installed().as_deref(), Some("1.1.0"));

    let outcome = engine.revert("1.0.0").unwrap();
    assert_eq!(outcome.from.as_deref(), Some("1.1.0"));
    assert_eq!(h.installed().as_deref(), Some("1.0.0"));
    assert_eq!(engine.installer().pending().unwrap(), 0);
}

#[test]
fn revert_empty_version_touches_nothing() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0"]);
    let engine = h.engine();

    let err = engine.revert("").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.source.fetch_count(), 0);
    assert_eq!(h.source.download_count(), 0);
    assert!(!h.state.exists(), "state directory must not be created");
}

#[test]
fn failure_before_swap_leaves_installation() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "2.0.0"]);
    h.backend.fail_at(FailPoint::VerifyStage);
    let engine = h.engine();

    let err = engine.revert("2.0.0").unwrap_err();
    assert!(matches!(err, CoreError::Update(_)), "got {err:?}");
    assert!(err.to_string().contains("installed version unchanged"));
    assert_eq!(h.installed().as_deref(), Some("1.0.0"));
    assert_eq!(h.backend.activation_count(), 0);
    assert_eq!(engine.installer().pending().unwrap(), 0);
}

#[test]
fn failure_after_swap_rolls_back() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "2.0.0"]);
    h.backend.fail_at(FailPoint::VerifyInstalled);
    let engine = h.engine();

    let err = engine.update().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Update);
    assert!(err.to_string().contains("rolled back to 1.0.0"), "{err}");
    assert_eq!(h.installed().as_deref(), Some("1.0.0"));
    assert_eq!(engine.installer().pending().unwrap(), 0);
}

#[test]
fn failed_activation_rolls_back() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "2.0.0"]);
    h.backend.fail_at(FailPoint::Activate);
    let engine = h.engine();

    let err = engine.update().unwrap_err();
    assert!(matches!(err, CoreError::Update(_)));
    assert_eq!(h.installed().as_deref(), Some("1.0.0"));
}

#[test]
fn rollback_failure_is_distinct() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "2.0.0"]);
    h.backend.fail_at(FailPoint::Reload);
    h.backend.fail_at(FailPoint::Reactivate);
    let engine = h.engine();

    let err = engine.update().unwrap_err();
    assert!(matches!(err, CoreError::RollbackFailed(_)), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::RollbackFailed);
    assert_eq!(engine.installer().pending().unwrap(), 1);

    // A later run retries the rollback before doing anything else.
    h.backend.clear_failures();
    assert!(engine.backup().unwrap());
    assert_eq!(engine.installer().pending().unwrap(), 0);
    assert_eq!(h.installed().as_deref(), Some("1.0.0"));
}

#[test]
fn interrupted_swap_is_recovered_on_next_run() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "2.0.0"]);
    let layout = StoreLayout::new(&h.state);
    layout.initialize().unwrap();

    // Simulate a run killed mid-swap.
    let journal = InstallJournal::new(&layout);
    journal.initialize().unwrap();
    let op_id = journal
        .begin(InstallKind::Update, Some("1.0.0"), "2.0.0")
        .unwrap();
    let staging = layout.staging_dir().join(&op_id);
    fs::create_dir_all(&staging).unwrap();
    journal
        .add_rollback_step(&op_id, RollbackStep::RemoveDir(staging.clone()))
        .unwrap();
    journal
        .add_rollback_step(
            &op_id,
            RollbackStep::Reactivate {
                version: "1.0.0".to_owned(),
            },
        )
        .unwrap();
    journal.set_state(&op_id, InstallState::Swapping).unwrap();
    h.backend.force_installed("2.0.0");

    let engine = h.engine();
    assert_eq!(engine.status().unwrap().pending_recovery, 1);

    let outcome = engine.revert("1.0.0").unwrap();
    assert!(!outcome.changed, "recovery already restored 1.0.0");
    assert_eq!(h.installed().as_deref(), Some("1.0.0"));
    assert!(!staging.exists());
    assert!(journal.list_incomplete().unwrap().is_empty());
}

#[test]
fn concurrent_updates_one_proceeds() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "1.1.0"]);
    let layout = StoreLayout::new(&h.state);
    layout.initialize().unwrap();

    // Hold the lock as the first updater would while it installs.
    let held = LifecycleLock::acquire(&layout.lock_file(), Duration::from_secs(1)).unwrap();
    let barrier = Arc::new(Barrier::new(2));
    let second = {
        let barrier = Arc::clone(&barrier);
        let engine = h.engine();
        thread::spawn(move || {
            barrier.wait();
            engine.update()
        })
    };
    barrier.wait();
    let result = second.join().unwrap();
    assert!(matches!(result, Err(CoreError::LockHeld)));
    assert_eq!(h.installed().as_deref(), Some("1.0.0"), "no partial state");
    assert_eq!(h.backend.activation_count(), 0);

    drop(held);
    let outcome = h.engine().update().unwrap();
    assert_eq!(outcome.to, "1.1.0");
}

#[test]
fn racing_engines_serialize() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "1.1.0"]);
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let engine = h.engine().with_lock_timeout(Duration::ZERO);
            thread::spawn(move || {
                barrier.wait();
                engine.update()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    // Either one wins and the other sees the lock, or they ran back to back
    // and the second found nothing to do. Exactly one activation either way.
    let installed = results.iter().filter(|r| matches!(r, Ok(o) if o.changed)).count();
    assert_eq!(installed, 1);
    for r in &results {
        assert!(matches!(r, Ok(_) | Err(CoreError::LockHeld)));
    }
    assert_eq!(h.backend.activation_count(), 1);
    assert_eq!(h.installed().as_deref(), Some("1.1.0"));
}

#[test]
fn status_reports_catalog_and_backup() {
    let h = Harness::new(Some("1.0.0"), &["1.0.0", "1.1.0"]);
    let engine = h.engine();
    engine.save_config(&config("urn:idp:s")).unwrap();
    engine.backup().unwrap();

    let status = engine.status().unwrap();
    assert_eq!(status.installed.as_deref(), Some("1.0.0"));
    assert_eq!(status.latest.as_deref(), Some("1.1.0"));
    assert_eq!(status.latest_date.as_deref(), Some("2025-02-14"));
    assert!(status.update_available);
    assert_eq!(status.supported, vec!["1.1.0", "1.0.0"]);
    assert_eq!(status.host_version.as_deref(), Some("2.7.2-RELEASE"));
    assert!(status.cache_fetched_at.is_some());
    assert!(status.backup_created_at.is_some());
}

#[test]
fn status_tolerates_unreachable_registry() {
    let h = Harness::new(Some("1.0.0"), &[]);
    h.source.set_document(None);
    let status = h.engine().status().unwrap();
    assert_eq!(status.latest, None);
    assert!(!status.update_available);
}

#[test]
fn releases_for_other_platforms_are_ignored() {
    let h = Harness::new(Some("1.0.0"), &[]);
    let mut releases = vec![Release {
        version: PkgVersion::parse("1.0.0").unwrap(),
        release_date: "2025-01-01".to_owned(),
        platform_constraint: "2.7".to_owned(),
        artifact_url: "https://registry.example/1.0.0.pkg".to_owned(),
    }];
    releases.push(Release {
        version: PkgVersion::parse("3.0.0").unwrap(),
        release_date: "2025-06-01".to_owned(),
        platform_constraint: "24.11".to_owned(),
        artifact_url: "https://registry.example/3.0.0.pkg".to_owned(),
    });
    h.source.set_releases(&releases);

    let engine = h.engine();
    assert!(!engine.is_update_available().unwrap());
    let err = engine.revert("3.0.0").unwrap_err();
    assert!(err.to_string().contains("not available"));
}
