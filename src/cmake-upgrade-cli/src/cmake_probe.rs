//! Detection of the installed CMake version.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use cmake_upgrade::{ProcessRunner, ToolResolver};
use regex::Regex;
use tracing::debug;

static VERSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^cmake version (\d+(?:\.\d+)*)").expect("valid regex")
});

/// Pull the dotted version out of `cmake --version` output.
///
/// Pre-release suffixes such as `-rc1` are dropped.
pub fn parse_version_output(output: &str) -> Option<String> {
    VERSION_LINE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

/// Locate the `cmake` executable: `explicit` when given, otherwise `PATH`.
pub async fn locate(explicit: Option<&Path>, resolver: &dyn ToolResolver) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => resolver.which("cmake").await,
    }
}

/// Run `cmake --version` and return the installed version.
pub async fn installed_version(cmake: &Path, runner: &dyn ProcessRunner) -> Result<String> {
    let output = runner
        .execute(cmake, &[OsString::from("--version")])
        .await
        .with_context(|| format!("Failed to run {}", cmake.display()))?;

    if output.exit_code != Some(0) {
        bail!(
            "{} --version failed: {}",
            cmake.display(),
            output.stderr.trim()
        );
    }

    let version = parse_version_output(&output.stdout).with_context(|| {
        format!(
            "Unrecognized output from {} --version: {}",
            cmake.display(),
            output.stdout.trim()
        )
    })?;
    debug!(cmake = %cmake.display(), %version, "Detected installed CMake");
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cmake_upgrade::ProcessOutput;
    use pretty_assertions::assert_eq;

    struct FakeRunner(ProcessOutput);

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn execute(&self, _: &Path, args: &[OsString]) -> std::io::Result<ProcessOutput> {
            assert_eq!(args, [OsString::from("--version")]);
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_parse_version_output() {
        let output = "cmake version 3.28.3\n\nCMake suite maintained and supported by Kitware (kitware.com/cmake).\n";
        assert_eq!(parse_version_output(output).as_deref(), Some("3.28.3"));
        assert_eq!(
            parse_version_output("cmake version 3.29.0-rc1\n").as_deref(),
            Some("3.29.0")
        );
        assert_eq!(parse_version_output("ninja 1.11.1\n"), None);
    }

    #[tokio::test]
    async fn test_installed_version() {
        let runner = FakeRunner(ProcessOutput {
            exit_code: Some(0),
            stdout: "cmake version 3.10.2\n".to_string(),
            stderr: String::new(),
        });
        let version = installed_version(Path::new("/usr/bin/cmake"), &runner)
            .await
            .unwrap();
        assert_eq!(version, "3.10.2");
    }

    #[tokio::test]
    async fn test_installed_version_failure() {
        let runner = FakeRunner(ProcessOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "segfault".to_string(),
        });
        let err = installed_version(Path::new("cmake"), &runner)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("segfault"));
    }

    #[tokio::test]
    async fn test_locate_prefers_explicit_path() {
        struct NoTools;

        #[async_trait]
        impl ToolResolver for NoTools {
            async fn which(&self, _: &str) -> Option<PathBuf> {
                None
            }
        }

        assert_eq!(
            locate(Some(Path::new("/opt/cmake/bin/cmake")), &NoTools).await,
            Some(PathBuf::from("/opt/cmake/bin/cmake"))
        );
        assert_eq!(locate(None, &NoTools).await, None);
    }
}
