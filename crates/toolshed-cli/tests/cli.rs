//! End-to-end tests for the toolshed CLI binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const VARS: [&str; 10] = [
    "TOOLSHED_ROOT_DIR",
    "TOOLSHED_CONFIG",
    "TOOLSHED_GLOBAL_CONFIG",
    "TOOLSHED_POLICY_CONFIG",
    "TOOLSHED_MAX_PARALLELISM",
    "TOOLSHED_DISABLE_LAZY_INSTALL",
    "TOOLSHED_DISABLE_POLICY",
    "TOOLSHED_REQUIRE_CHECKSUM",
    "TOOLSHED_LOG_LEVEL",
    "GITHUB_TOKEN",
];

/// A temporary root and project directory.
struct TestContext {
    temp_dir: TempDir,
    root: PathBuf,
    project: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path().join("root");
        let project = temp_dir.path().join("project");
        std::fs::create_dir_all(&project).expect("failed to create project dir");
        Self {
            temp_dir,
            root,
            project,
        }
    }

    fn toolshed(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_toolshed"));
        for var in VARS {
            cmd.env_remove(var);
        }
        cmd.env("HOME", self.temp_dir.path())
            .env("TOOLSHED_ROOT_DIR", &self.root)
            .current_dir(&self.project);
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.toolshed()
            .args(args)
            .output()
            .expect("failed to run toolshed")
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.project.join(name);
        std::fs::write(&path, content).expect("failed to write file");
        path
    }

    /// A local registry and a manifest pinning `acme/hello` (command `hello`).
    fn write_hello_manifest(&self) {
        self.write(
            "registry.toml",
            r#"
[[packages]]
name = "acme/hello"
repo = "acme/hello"
asset = "hello_{{trimV .Version}}_{{.OS}}_{{.Arch}}.tar.gz"
"#,
        );
        self.write(
            "toolshed.toml",
            r#"
[[registries]]
name = "standard"
path = "registry.toml"

[[packages]]
name = "acme/hello@v1.0.0"
"#,
        );
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("Usage:"));
    assert!(out.contains("update-checksum"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    assert!(ctx.run(&["--version"]).status.success());
}

#[test]
fn test_root_dir_follows_variable() {
    let ctx = TestContext::new();
    let output = ctx.run(&["root-dir"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), ctx.root.display().to_string());
}

#[test]
fn test_root_dir_defaults_under_home() {
    let ctx = TestContext::new();
    let output = ctx
        .toolshed()
        .env_remove("TOOLSHED_ROOT_DIR")
        .arg("root-dir")
        .output()
        .expect("failed to run toolshed");
    assert!(output.status.success());
    assert_eq!(
        Path::new(stdout(&output).trim()),
        ctx.temp_dir.path().join(".toolshed")
    );
}

#[test]
fn test_list_on_empty_root() {
    let ctx = TestContext::new();
    let output = ctx.run(&["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No packages installed."));
}

#[test]
fn test_malformed_toggle_is_fatal() {
    let ctx = TestContext::new();
    let output = ctx
        .toolshed()
        .env("TOOLSHED_DISABLE_POLICY", "maybe")
        .arg("list")
        .output()
        .expect("failed to run toolshed");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("TOOLSHED_DISABLE_POLICY"));
}

#[test]
fn test_policy_check() {
    let ctx = TestContext::new();
    let policy = ctx.write(
        "policy.toml",
        "[[rules]]\nkind = \"allow\"\ntarget = \"config\"\npattern = \"trusted/toolshed.toml\"\n",
    );
    let policy = policy.display().to_string();

    let allowed = ctx
        .toolshed()
        .env("TOOLSHED_POLICY_CONFIG", &policy)
        .args(["policy", "check", "trusted/toolshed.toml"])
        .output()
        .expect("failed to run toolshed");
    assert!(allowed.status.success());
    assert!(stdout(&allowed).contains("allowed by rule #1"));

    let denied = ctx
        .toolshed()
        .env("TOOLSHED_POLICY_CONFIG", &policy)
        .args(["policy", "check", "elsewhere/toolshed.toml"])
        .output()
        .expect("failed to run toolshed");
    assert!(!denied.status.success());
    assert!(stderr(&denied).contains("not allowed"));

    let disabled = ctx
        .toolshed()
        .env("TOOLSHED_POLICY_CONFIG", &policy)
        .env("TOOLSHED_DISABLE_POLICY", "1")
        .args(["policy", "check", "elsewhere/toolshed.toml"])
        .output()
        .expect("failed to run toolshed");
    assert!(disabled.status.success());
}

#[test]
fn test_install_without_manifest_does_nothing() {
    let ctx = TestContext::new();
    let output = ctx.run(&["install"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Nothing to install."));
}

#[cfg(unix)]
#[test]
fn test_only_link_creates_lazy_shims() {
    let ctx = TestContext::new();
    ctx.write_hello_manifest();

    let output = ctx.run(&["install", "--only-link"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Linked 1 command(s)"));

    let shim = std::fs::read_to_string(ctx.root.join("bin").join("hello")).unwrap();
    assert!(shim.contains("exec 'hello'"));
    assert!(!ctx.root.join("pkgs").exists());
}

#[test]
fn test_exec_with_lazy_install_disabled_does_not_download() {
    let ctx = TestContext::new();
    ctx.write_hello_manifest();

    let output = ctx
        .toolshed()
        .env("TOOLSHED_DISABLE_LAZY_INSTALL", "1")
        .args(["exec", "hello", "--greeting"])
        .output()
        .expect("failed to run toolshed");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("is not installed"), "{}", stderr(&output));
    assert!(!ctx.root.join("pkgs").exists());
}

#[test]
fn test_which_never_installs() {
    let ctx = TestContext::new();
    ctx.write_hello_manifest();

    let output = ctx.run(&["which", "hello"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("is not installed"), "{}", stderr(&output));
    assert!(!ctx.root.join("pkgs").exists());

    let unknown = ctx.run(&["which", "nope"]);
    assert!(!unknown.status.success());
    assert!(stderr(&unknown).contains("not provided by any package"));
}

#[test]
fn test_remove_validates_its_arguments() {
    let ctx = TestContext::new();

    let nothing = ctx.run(&["remove"]);
    assert!(!nothing.status.success());
    assert!(stderr(&nothing).contains("--all"));

    let missing = ctx.run(&["remove", "acme/hello"]);
    assert!(!missing.status.success());
    assert!(stderr(&missing).contains("'acme/hello' is not installed"));

    let all = ctx.run(&["remove", "--all"]);
    assert!(all.status.success());
    assert!(stdout(&all).contains("No packages installed."));
}
