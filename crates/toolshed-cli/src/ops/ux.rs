//! Post-install checks on the user's `PATH`.

use std::path::Path;

use toolshed_core::Reporter;

/// Warn when `bin_dir` is not on `PATH` or a command resolves elsewhere.
pub fn perform_ux_checks(bin_dir: &Path, commands: &[String], reporter: &dyn Reporter) {
    let path_env = std::env::var_os("PATH").unwrap_or_default();
    let is_in_path = std::env::split_paths(&path_env).any(|p| p == bin_dir);

    if !is_in_path {
        reporter.warning(&format!(
            "{} is not in your PATH. Add this to your shell profile: export PATH=\"{}:$PATH\"",
            bin_dir.display(),
            bin_dir.display()
        ));
        return;
    }

    for command in commands {
        let Ok(path) = which::which(command) else {
            continue;
        };
        if !path.starts_with(bin_dir) {
            reporter.warning(&format!(
                "'{command}' is shadowed by {} which comes earlier in PATH",
                path.display()
            ));
        }
    }
}
