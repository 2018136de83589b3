use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// `cligate` isolated from the host's config, credentials and environment
fn cligate(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cligate").unwrap();
    for var in [
        "CLIGATE_LOG_LEVEL",
        "CLIGATE_LOG_FORMAT",
        "CLIGATE_OPENSTACK_ALLOW_WRITE",
        "CLIGATE_OPENSHIFT_ALLOW_WRITE",
        "CLIGATE_TOKEN",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home)
        .env("CLIGATE_CONFIG", home.join("missing.yaml"))
        .current_dir(home);
    cmd
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cligate 0.1.0"));
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_cli_check_missing_command() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .args(["check", "--backend", "openshift"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required arguments were not provided"));
}

#[test]
fn test_cli_check_openshift_verdicts() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .args(["check", "--backend", "openshift", "oc get pods -n 'my ns'"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allowed: get pods -n my ns"));

    cligate(home.path())
        .args(["check", "--backend", "openshift", "delete pod x"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("denied (blocked)"));

    cligate(home.path())
        .args(["check", "--backend", "openshift", "get pods --kubeconfig=/tmp/k"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("denied (global_argument)"));
}

#[test]
fn test_cli_check_allow_write() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .args(["check", "--backend", "openshift", "--allow-write", "delete pod x"])
        .assert()
        .success();

    // The deny-list still applies
    cligate(home.path())
        .args(["check", "--backend", "openshift", "--allow-write", "config view"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("denied (blocked)"));
}

#[test]
fn test_cli_check_openstack_verbs() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .args(["check", "--backend", "openstack", "openstack server list --long"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allowed: server list --long"));

    cligate(home.path())
        .args(["check", "--backend", "openstack", "server create vm1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("denied (blocked)"));
}

#[test]
fn test_cli_check_interactive_rejected() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .args(["check", "--backend", "openstack", "openstack"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("denied (parse)"));
}

#[test]
fn test_cli_run_without_credentials() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .args(["run", "--backend", "openshift", "get pods"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Missing OpenShift credentials"));
}

#[test]
fn test_cli_rejects_malformed_header() {
    let home = TempDir::new().unwrap();
    cligate(home.path())
        .args(["run", "--backend", "openshift", "--header", "novalue", "get pods"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected KEY=VALUE"));
}

#[cfg(unix)]
mod with_fake_backend {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    /// Config pointing the OpenShift profile at a script
    fn setup(home: &Path, script: &str) -> std::path::PathBuf {
        let program = home.join("fake-oc");
        fs::write(&program, script).unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let config = home.join("cligate.yaml");
        fs::write(
            &config,
            format!(
                "openstack:\n  enabled: false\nopenshift:\n  program: {}\n  credential_dirs: []\n",
                program.display()
            ),
        )
        .unwrap();
        config
    }

    #[test]
    fn test_cli_run_passes_header_credentials() {
        let home = TempDir::new().unwrap();
        let config = setup(home.path(), "#!/bin/sh\necho \"$@\"\n");

        cligate(home.path())
            .arg("--config")
            .arg(&config)
            .args([
                "run",
                "--backend",
                "openshift",
                "--header",
                "OCP_TOKEN=sha256~abc",
                "--header",
                "OCP_URL=https://api.example:6443",
                "oc get pods -n default",
            ])
            .assert()
            .success()
            .stdout("--token sha256~abc --server https://api.example:6443 get pods -n default\n");
    }

    #[test]
    fn test_cli_run_propagates_backend_failure() {
        let home = TempDir::new().unwrap();
        let config = setup(home.path(), "#!/bin/sh\necho 'not found' >&2\nexit 4\n");

        cligate(home.path())
            .arg("--config")
            .arg(&config)
            .args([
                "run",
                "--backend",
                "openshift",
                "--header",
                "OCP_TOKEN=t",
                "--header",
                "OCP_URL=u",
                "get pod missing",
            ])
            .assert()
            .code(4)
            .stderr(predicate::str::contains("not found"));
    }
}
