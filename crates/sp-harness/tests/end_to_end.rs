#![forbid(unsafe_code)]
#![cfg(unix)]

//! Full runs through the real process-backed copiers, with shell scripts
//! standing in for the shadow-copy launcher and the mirroring tool.

use sp_error::SpError;
use sp_harness::{CancelToken, IntegrityVerifier, RunOutcome, WorkspaceLayout, restore_backup};
use sp_spawn::{Robocopy, ShadowSpawn};
use sp_types::{BlockSize, TestConfiguration};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// All scripts are written before any is executed, and from a single test,
// so no concurrently forked child holds a script open for writing.
#[test]
fn verification_through_stand_in_tools() {
    let bin = tempfile::tempdir().unwrap();
    // shadowspawn /verbosity=N <source> X: <mirror> X:\ <dest> flags...
    let shadowspawn = write_script(bin.path(), "shadowspawn", r#"cp -R "$2"/. "$6"/"#);
    let shadowspawn_rot = write_script(
        bin.path(),
        "shadowspawn-rot",
        r#"cp -R "$2"/. "$6"/ && printf 'X' | dd of="$6/data.0.0.dat" bs=1 seek=4096 conv=notrunc 2>/dev/null"#,
    );
    let shadowspawn_wrapped_fail = write_script(bin.path(), "shadowspawn-fail", "exit 2");
    // robocopy <from> <to> flags...
    let robocopy = write_script(bin.path(), "robocopy", r#"cp -R "$1"/. "$2"/ && exit 1"#);

    let config = TestConfiguration::new(2, 2, BlockSize::new(4096).unwrap()).unwrap();

    // Clean run with the direct mirror enabled.
    let root = tempfile::tempdir().unwrap();
    let layout = WorkspaceLayout::new(root.path());
    let mut shadow = ShadowSpawn::new(&shadowspawn, 2, "robocopy");
    let mut direct = Robocopy::new(&robocopy);
    let report = IntegrityVerifier::new(config, layout.clone(), 5, &mut shadow)
        .with_direct_copy(&mut direct)
        .run()
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.blocks_verified, 4);
    assert_eq!(report.direct_copies, 4);
    assert_eq!(report.last_shadow_copy.as_ref().unwrap().tool, "shadowspawn");
    for name in ["data.0.0.dat", "data.0.1.dat"] {
        let data = fs::read(layout.data_dir().join(name)).unwrap();
        assert_eq!(data, fs::read(layout.shadow_dir().join(name)).unwrap());
        assert_eq!(data, fs::read(layout.direct_dir().join(name)).unwrap());
    }

    // The restore helper puts the shadow copy back over damaged data.
    fs::write(layout.data_dir().join("data.0.0.dat"), b"damaged").unwrap();
    let restored = restore_backup(&layout, &mut Robocopy::new(&robocopy)).unwrap();
    assert_eq!(restored.mirror_code, 1);
    assert_eq!(
        fs::read(layout.data_dir().join("data.0.0.dat")).unwrap(),
        fs::read(layout.shadow_dir().join("data.0.0.dat")).unwrap()
    );

    // A launcher that corrupts the second block of stream 0 in its copy.
    let root = tempfile::tempdir().unwrap();
    let mut shadow = ShadowSpawn::new(&shadowspawn_rot, 2, "robocopy");
    let err = IntegrityVerifier::new(config, WorkspaceLayout::new(root.path()), 5, &mut shadow)
        .run()
        .unwrap_err();
    let mismatch = err.mismatch().unwrap();
    assert!(matches!(err, SpError::ShadowCopyMismatch(_)));
    assert_eq!(mismatch.block_index, 1);
    assert_eq!(mismatch.byte_offset, 4096);
    assert_ne!(mismatch.expected_hash, mismatch.actual_hash);

    // Launcher failure surfaces as its own exit code.
    let root = tempfile::tempdir().unwrap();
    let mut shadow = ShadowSpawn::new(&shadowspawn_wrapped_fail, 2, "robocopy");
    let err = IntegrityVerifier::new(config, WorkspaceLayout::new(root.path()), 5, &mut shadow)
        .run()
        .unwrap_err();
    assert!(matches!(err, SpError::LauncherFailed { raw: 2, .. }));
    assert_eq!(err.exit_code(), 40);

    // Missing launcher fails before anything is touched.
    let root = tempfile::tempdir().unwrap();
    let mut shadow = ShadowSpawn::new(bin.path().join("absent"), 2, "robocopy");
    let err = IntegrityVerifier::new(config, WorkspaceLayout::new(root.path()), 5, &mut shadow)
        .run()
        .unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(!WorkspaceLayout::new(root.path()).data_dir().exists());

    // A pre-set cancellation stops before the first block.
    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut shadow = ShadowSpawn::new(&shadowspawn, 2, "robocopy");
    let report = IntegrityVerifier::new(config, WorkspaceLayout::new(root.path()), 5, &mut shadow)
        .with_cancel(cancel)
        .run()
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.shadow_copies, 0);
}
