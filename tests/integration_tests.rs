//! Integration tests for the launchpad CLI
//!
//! These tests drive the binary end to end from a scratch directory.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a launchpad Command isolated from the user's config and
/// environment.
fn launchpad(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("launchpad");
    cmd.current_dir(dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env_remove("RUST_LOG")
        .env_remove("LAUNCHPAD_PACKAGE_MANAGER")
        .env_remove("LAUNCHPAD_PORT_RANGE")
        .env_remove("LAUNCHPAD_TUNNEL")
        .env_remove("LAUNCHPAD_TUNNEL_BINARY");
    cmd
}

/// Helper to create a project with a `dev` script
fn create_project(dir: &TempDir, name: &str) -> PathBuf {
    let root = dir.path().join(name);
    fs::create_dir_all(&root).unwrap();
    fs::write(
        root.join("package.json"),
        r#"{"name": "demo", "scripts": {"dev": "vite", "build": "vite build"}}"#,
    )
    .unwrap();
    fs::write(root.join("index.html"), "<h1>hello from demo</h1>").unwrap();
    root
}

/// Helper to write an executable shell script
#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_launchpad_help() {
        let dir = TempDir::new().unwrap();
        launchpad(dir.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("deploy"))
            .stdout(predicate::str::contains("serve"));
    }

    #[test]
    fn test_launchpad_version() {
        let dir = TempDir::new().unwrap();
        launchpad(dir.path())
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        launchpad(dir.path()).arg("launch").assert().failure();
    }

    #[test]
    fn test_bad_port_range_rejected() {
        let dir = TempDir::new().unwrap();
        let project = create_project(&dir, "app");
        launchpad(dir.path())
            .arg("check")
            .arg(&project)
            .args(["--port-range", "4000-3000"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        launchpad(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No launchpad.toml found"))
            .stdout(predicate::str::contains("[ports]"))
            .stdout(predicate::str::contains("start = 3000"))
            .stdout(predicate::str::contains("package_manager = \"npm\""));
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        launchpad(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created launchpad.toml"));

        let content = fs::read_to_string(dir.path().join("launchpad.toml")).unwrap();
        assert!(content.contains("[install]"));
        assert!(content.contains("[tunnel]"));
    }

    #[test]
    fn test_config_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("launchpad.toml"), "[ports]\nstart = 4000\n").unwrap();

        launchpad(dir.path())
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--force"));

        let content = fs::read_to_string(dir.path().join("launchpad.toml")).unwrap();
        assert!(content.contains("start = 4000"));

        launchpad(dir.path())
            .args(["config", "init", "--force"])
            .assert()
            .success();
        let content = fs::read_to_string(dir.path().join("launchpad.toml")).unwrap();
        assert!(content.contains("start = 3000"));
    }

    #[test]
    fn test_config_show_reads_local_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("launchpad.toml"),
            "[ports]\nstart = 4000\nend = 4010\n\n[install]\npackage_manager = \"pnpm\"\n",
        )
        .unwrap();

        launchpad(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("# Config file: launchpad.toml"))
            .stdout(predicate::str::contains("start = 4000"))
            .stdout(predicate::str::contains("package_manager = \"pnpm\""));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("launchpad.toml"), "[ports]\nstart = 4000\n").unwrap();

        launchpad(dir.path())
            .env("LAUNCHPAD_PORT_RANGE", "5000-5005")
            .env("LAUNCHPAD_TUNNEL", "off")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("start = 5000"))
            .stdout(predicate::str::contains("end = 5005"))
            .stdout(predicate::str::contains("enabled = false"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("launchpad.toml"),
            "[ports]\nstart = 4000\nend = 3000\n",
        )
        .unwrap();

        launchpad(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("ports.start"));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("launchpad.toml"), "[ports\nstart = ").unwrap();

        launchpad(dir.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("launchpad.toml"));
    }
}

// =============================================================================
// Preflight Tests
// =============================================================================

mod check_command {
    use super::*;

    #[test]
    fn test_check_deployable_project() {
        let dir = TempDir::new().unwrap();
        let project = create_project(&dir, "app");

        launchpad(dir.path())
            .arg("check")
            .arg(&project)
            .args(["--no-tunnel"])
            .assert()
            .success()
            .stdout(predicate::str::contains("declares 'dev'"))
            .stdout(predicate::str::contains("dependencies not installed yet"))
            .stdout(predicate::str::contains("npm install && npm run dev"));
    }

    #[test]
    fn test_check_missing_dev_script() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("app");
        fs::create_dir_all(&project).unwrap();
        fs::write(
            project.join("package.json"),
            r#"{"name": "demo", "scripts": {"build": "vite build"}}"#,
        )
        .unwrap();

        launchpad(dir.path())
            .arg("check")
            .arg(&project)
            .assert()
            .code(1)
            .stdout(predicate::str::contains("dev"));
    }

    #[test]
    fn test_check_production_mode_needs_build_and_preview() {
        let dir = TempDir::new().unwrap();
        let project = create_project(&dir, "app");

        launchpad(dir.path())
            .arg("check")
            .arg(&project)
            .args(["--mode", "production"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("production mode"))
            .stdout(predicate::str::contains("'preview'"));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let dir = TempDir::new().unwrap();
        let project = create_project(&dir, "app");

        launchpad(dir.path())
            .arg("check")
            .arg(&project)
            .args(["--mode", "staging"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown mode"));
    }

    #[test]
    fn test_check_sees_installed_dependencies() {
        let dir = TempDir::new().unwrap();
        let project = create_project(&dir, "app");
        fs::create_dir_all(project.join("node_modules/.bin")).unwrap();
        fs::write(project.join("node_modules/.bin/vite"), "").unwrap();

        launchpad(dir.path())
            .arg("check")
            .arg(&project)
            .assert()
            .success()
            .stdout(predicate::str::contains("dependencies installed"));
    }
}

// =============================================================================
// Deploy Tests
// =============================================================================

mod deploy_command {
    use super::*;

    fn json_result(output: &std::process::Output) -> serde_json::Value {
        serde_json::from_slice(&output.stdout).expect("deploy --json prints one JSON document")
    }

    #[test]
    fn test_deploy_missing_project_fails() {
        let dir = TempDir::new().unwrap();

        let output = launchpad(dir.path())
            .args(["deploy", "does-not-exist", "--json", "--no-hold", "--no-tunnel"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let result = json_result(&output);
        assert_eq!(result["status"], "failed");
        assert_eq!(result["strategy_used"], "manual");
        assert!(result["local_url"].is_null());
        assert!(result["manual_instructions"]["commands"].is_array());
        assert_eq!(result["diagnostics"][0]["kind"], "invalid_project");
    }

    #[test]
    fn test_deploy_text_report_for_invalid_project() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("app");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("package.json"), r#"{"name": "demo"}"#).unwrap();

        launchpad(dir.path())
            .arg("deploy")
            .arg(&project)
            .args(["--no-hold", "--no-tunnel"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("cannot be deployed"))
            .stdout(predicate::str::contains("Run it yourself"));
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_falls_back_to_manual_when_install_fails() {
        let dir = TempDir::new().unwrap();
        let project = create_project(&dir, "app");
        let pm = write_script(
            dir.path(),
            "broken-pm",
            "#!/bin/sh\necho 'npm ERR! network unreachable' >&2\nexit 1\n",
        );

        let output = launchpad(dir.path())
            .arg("deploy")
            .arg(&project)
            .args(["--json", "--no-hold", "--no-tunnel", "--package-manager"])
            .arg(&pm)
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(2));
        let result = json_result(&output);
        assert_eq!(result["status"], "partial_success");
        assert_eq!(result["strategy_used"], "manual");
        let diagnostics = result["diagnostics"].as_array().unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics.iter().all(|d| d["kind"] == "install_failure"));
        assert!(
            diagnostics[0]["message"]
                .as_str()
                .unwrap()
                .contains("network unreachable")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_deploy_serves_project() {
        let dir = TempDir::new().unwrap();
        let project = create_project(&dir, "app");
        let pm = write_script(
            dir.path(),
            "fake-pm",
            &format!(
                "#!/bin/sh\ncase \"$1\" in\n  install) mkdir -p node_modules/.bin && : > node_modules/.bin/vite ;;\n  run) exec '{}' serve . --port \"$PORT\" --host 127.0.0.1 ;;\nesac\n",
                env!("CARGO_BIN_EXE_launchpad")
            ),
        );
        fs::write(
            dir.path().join("launchpad.toml"),
            "[server]\nhost = \"127.0.0.1\"\npoll_interval_ms = 100\nstop_grace_secs = 1\n",
        )
        .unwrap();

        let output = launchpad(dir.path())
            .arg("deploy")
            .arg(&project)
            .args(["--json", "--no-hold", "--no-tunnel"])
            .args(["--port-range", "43100-43200", "--package-manager"])
            .arg(&pm)
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(0));
        let result = json_result(&output);
        assert_eq!(result["status"], "success");
        assert_eq!(result["strategy_used"], "full");
        let port = result["port"].as_u64().unwrap();
        assert!((43100..=43200).contains(&port));
        assert_eq!(
            result["local_url"],
            format!("http://localhost:{}", port).as_str()
        );
        assert!(result["public_url"].is_null());
        assert!(result["manual_instructions"].is_null());
        assert!(project.join("node_modules/.bin/vite").exists());
    }
}

// =============================================================================
// Static Preview Tests
// =============================================================================

mod serve_command {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    struct KillOnDrop(std::process::Child);

    impl Drop for KillOnDrop {
        fn drop(&mut self) {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }

    #[tokio::test]
    async fn test_serve_directory() {
        let dir = TempDir::new().unwrap();
        let site = create_project(&dir, "dist");
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let child = std::process::Command::new(env!("CARGO_BIN_EXE_launchpad"))
            .arg("serve")
            .arg(&site)
            .args(["--port", &port.to_string()])
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();
        let _guard = KillOnDrop(child);

        let url = format!("http://127.0.0.1:{}/", port);
        let mut body = None;
        for _ in 0..50 {
            if let Ok(response) = reqwest::get(&url).await {
                body = Some(response.text().await.unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(body.unwrap().contains("hello from demo"));

        // Unknown client routes fall back to index.html.
        let fallback = reqwest::get(format!("{}settings/profile", url))
            .await
            .unwrap();
        assert!(fallback.status().is_success());
        assert!(fallback.text().await.unwrap().contains("hello from demo"));
    }

    #[test]
    fn test_serve_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        launchpad(dir.path())
            .args(["serve", "no-such-dir", "--port", "0"])
            .assert()
            .failure();
    }
}
