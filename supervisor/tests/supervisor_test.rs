//! Integration tests for the backup supervisor.
//!
//! These start real mirror sessions and check the registry's view of them.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use dirmirror_engine::MirrorError;
use dirmirror_supervisor::{MirrorConfig, SourceGroup, Supervisor, SupervisorError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

struct Fixture {
    _temp_dir: TempDir,
    base: PathBuf,
    source: PathBuf,
}

fn fixture() -> Fixture {
    let temp_dir = TempDir::new().unwrap();
    let base = fs::canonicalize(temp_dir.path()).unwrap();
    let source = base.join("src");
    fs::create_dir(&source).unwrap();
    fs::write(source.join("notes.txt"), b"important").unwrap();
    Fixture {
        _temp_dir: temp_dir,
        base,
        source,
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_one_source_many_targets() {
    let fx = fixture();
    let targets = vec![fx.base.join("t1"), fx.base.join("t2")];

    let mut supervisor = Supervisor::new(MirrorConfig::new());
    let outcome = supervisor.add(&fx.source, &targets).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.succeeded, targets);
    for target in &targets {
        assert_eq!(fs::read(target.join("notes.txt")).unwrap(), b"important");
    }
    assert_eq!(
        supervisor.list(),
        vec![SourceGroup {
            source: fx.source.clone(),
            targets: targets.clone(),
        }]
    );

    // Both sessions mirror independently.
    fs::write(fx.source.join("later.txt"), b"later").unwrap();
    for target in &targets {
        let path = target.join("later.txt");
        assert!(wait_for(|| path.exists()).await);
    }

    assert_eq!(supervisor.shutdown().await, 2);
    assert!(supervisor.list().is_empty());
    assert!(supervisor.records().iter().all(|r| !r.active));
}

#[tokio::test]
async fn test_target_in_use_is_rejected() {
    let fx = fixture();
    let other_source = fx.base.join("other");
    fs::create_dir(&other_source).unwrap();
    let target = fx.base.join("t");

    let mut supervisor = Supervisor::new(MirrorConfig::new());
    supervisor
        .add(&fx.source, std::slice::from_ref(&target))
        .await
        .unwrap();

    let again = supervisor.add(&other_source, std::slice::from_ref(&target)).await;
    assert!(matches!(again, Err(SupervisorError::TargetAlreadyActive(_))));
    assert_eq!(supervisor.active_count(), 1);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_setup_errors_are_reported_per_target() {
    let fx = fixture();
    let occupied = fx.base.join("occupied");
    fs::create_dir(&occupied).unwrap();
    fs::write(occupied.join("keep.txt"), b"x").unwrap();
    let nested = fx.source.join("inside");
    let good = fx.base.join("good");

    let mut supervisor = Supervisor::new(MirrorConfig::new());
    let outcome = supervisor
        .add(&fx.source, &[occupied.clone(), nested.clone(), good.clone()])
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, vec![good]);
    assert_eq!(outcome.failed.len(), 2);
    assert!(matches!(
        outcome.failed[0].1,
        SupervisorError::Engine(MirrorError::TargetNotEmpty(_))
    ));
    assert!(matches!(
        outcome.failed[1].1,
        SupervisorError::Engine(MirrorError::TargetInsideSource { .. })
    ));
    assert!(!nested.exists());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_missing_source_rejects_request() {
    let fx = fixture();
    let mut supervisor = Supervisor::new(MirrorConfig::new());

    let result = supervisor
        .add(fx.base.join("nope"), &[fx.base.join("t")])
        .await;

    assert!(matches!(
        result,
        Err(SupervisorError::Engine(MirrorError::SourceNotFound(_)))
    ));
    assert!(supervisor.records().is_empty());
}

#[tokio::test]
async fn test_end_stops_only_named_pairs() {
    let fx = fixture();
    let keep = fx.base.join("keep");
    let dropped = fx.base.join("dropped");

    let mut supervisor = Supervisor::new(MirrorConfig::new());
    supervisor
        .add(&fx.source, &[keep.clone(), dropped.clone()])
        .await
        .unwrap();

    let outcome = supervisor
        .end(&fx.source, &[dropped.clone(), fx.base.join("never")])
        .await
        .unwrap();
    assert_eq!(outcome.succeeded, vec![dropped.clone()]);
    assert!(matches!(
        outcome.failed.as_slice(),
        [(_, SupervisorError::NoSuchSession { .. })]
    ));

    assert_eq!(
        supervisor.list(),
        vec![SourceGroup {
            source: fx.source.clone(),
            targets: vec![keep.clone()],
        }]
    );

    fs::write(fx.source.join("after-end.txt"), b"x").unwrap();
    let mirrored = keep.join("after-end.txt");
    assert!(wait_for(|| mirrored.exists()).await);
    assert!(!dropped.join("after-end.txt").exists());

    // The stopped target can be reused once emptied.
    fs::remove_dir_all(&dropped).unwrap();
    let outcome = supervisor
        .add(&fx.source, std::slice::from_ref(&dropped))
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(supervisor.active_count(), 2);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_vanished_source_marks_backup_inactive() {
    let fx = fixture();
    let target = fx.base.join("t");

    let mut supervisor = Supervisor::new(MirrorConfig::new());
    supervisor
        .add(&fx.source, std::slice::from_ref(&target))
        .await
        .unwrap();

    // Moving the source away keeps the backup intact.
    fs::rename(&fx.source, fx.base.join("moved")).unwrap();

    assert!(wait_for(|| supervisor.active_count() == 0).await);
    assert!(supervisor.list().is_empty());
    let record = &supervisor.records()[0];
    assert!(!record.active);
    assert!(record.stopped_at.is_some());

    let report = supervisor.restore(&fx.source, &target).await.unwrap();
    assert_eq!(report.files_restored, 1);
    assert_eq!(fs::read(fx.source.join("notes.txt")).unwrap(), b"important");
}

#[tokio::test]
async fn test_restore_rejects_non_directory_target() {
    let fx = fixture();
    let supervisor = Supervisor::new(MirrorConfig::new());

    let result = supervisor
        .restore(&fx.source, fx.source.join("notes.txt"))
        .await;
    assert!(matches!(
        result,
        Err(SupervisorError::Engine(MirrorError::TargetNotDirectory(_)))
    ));
}
