use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tempfile::tempdir;
use tokio::process::Command;

/// Writes an admin tool stand-in that logs its arguments and blocks on
/// `install node` until terminated.
fn admin_script(dir: &Path, log: &Path) -> PathBuf {
    let path = dir.join("admin");
    fs::write(
        &path,
        format!(
            "#!/bin/sh\necho \"$*\" >> {log}\ncase \" $* \" in\n  *\" install node \"*) exec sleep 30 ;;\nesac\nexit 0\n",
            log = log.display()
        ),
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn logged(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(ToString::to_string)
        .collect()
}

#[tokio::test]
async fn test_interrupt_during_install_cleans_up_before_exit() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("admin.log");
    let admin = admin_script(dir.path(), &log);

    let mut child = Command::new(env!("CARGO_BIN_EXE_testbed"))
        .arg("start-nodes")
        .arg("--product-home")
        .arg(dir.path().join("product"))
        .args(["--cluster-name", "sample", "--discovery-port", "55555"])
        .arg("--node-directory")
        .arg(dir.path().join("nodes"))
        .arg("--discovery-port-file")
        .arg(dir.path().join("discovery.port"))
        .arg("--admin-executable")
        .arg(&admin)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), async {
        while !logged(&log).iter().any(|line| line.contains("install node")) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("install never started");

    let pid = Pid::from_raw(i32::try_from(child.id().unwrap()).unwrap());
    kill(pid, Signal::SIGINT).unwrap();

    let status = tokio::time::timeout(Duration::from_secs(20), child.wait())
        .await
        .expect("cli did not exit after the interrupt")
        .unwrap();
    assert_eq!(status.code(), Some(130));

    let lines = logged(&log);
    let position = |command: &str| lines.iter().position(|line| line.contains(command));
    let (Some(stop), Some(remove)) = (position("stop node"), position("remove node")) else {
        panic!("cleanup commands missing from {lines:?}");
    };
    assert!(stop < remove);
}
