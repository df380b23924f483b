use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

static STRATUM_BINARY: OnceLock<Result<PathBuf, String>> = OnceLock::new();

/// Registry token written into every generated stack file.
pub const REGISTRY_TOKEN: &str = "ghp-e2e-registry-token";
/// Search engine password written into every generated stack file.
pub const SEARCH_PASSWORD: &str = "e2e-search-password";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub command_line: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    #[must_use]
    pub fn transcript(&self) -> String {
        format!(
            "$ {}\n[exit: {}]\n[stdout]\n{}[stderr]\n{}",
            self.command_line, self.exit_code, self.stdout, self.stderr
        )
    }
}

/// A directory holding one stack file, its state file and the kubeconfig a
/// run writes.
#[derive(Debug, Clone)]
pub struct StackDir {
    root: PathBuf,
}

impl StackDir {
    /// Write `stack.yaml` into `root`: every required setting plus `extra`,
    /// appended verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error when the stack file cannot be written.
    pub fn create(root: &Path, extra: &str) -> io::Result<Self> {
        let dir = Self {
            root: root.to_path_buf(),
        };
        dir.write_stack(&format!("{}{extra}", dir.required_settings()))?;
        Ok(dir)
    }

    /// Replace `stack.yaml` with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error when the stack file cannot be written.
    pub fn write_stack(&self, contents: &str) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.config_path(), contents)
    }

    #[must_use]
    pub fn required_settings(&self) -> String {
        format!(
            "stack: e2e\nkubeconfig_path: \"{}\"\nconfig:\n  gh_user: octocat\n  elasticsearch_user: elastic\nsecrets:\n  gh_pat: {REGISTRY_TOKEN}\n  elasticsearch_pwd: {SEARCH_PASSWORD}\n",
            to_yaml_path(&self.kubeconfig_path())
        )
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.root.join("stack.yaml")
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    #[must_use]
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.root.join("kubeconfig.yaml")
    }

    /// `stratum preview --config stack.yaml <flags>`
    ///
    /// # Errors
    ///
    /// Returns an error if building or running the binary fails.
    pub fn preview(&self, flags: &[&str]) -> Result<RunResult, String> {
        let config = self.config_path().display().to_string();
        let mut args = vec!["preview", "--config", config.as_str()];
        args.extend_from_slice(flags);
        run_stratum(&self.root, &args)
    }

    /// `stratum up --config stack.yaml --state state.json <flags>`
    ///
    /// # Errors
    ///
    /// Returns an error if building or running the binary fails.
    pub fn up(&self, flags: &[&str]) -> Result<RunResult, String> {
        let config = self.config_path().display().to_string();
        let state = self.state_path().display().to_string();
        let mut args = vec!["up", "--config", config.as_str(), "--state", state.as_str()];
        args.extend_from_slice(flags);
        run_stratum(&self.root, &args)
    }
}

/// Run `stratum <args>` as an external process inside `workdir`.
///
/// `NO_PAGER=1` is always set and `STRATUM_LOG` cleared so output only
/// carries the rendered plan or report.
///
/// # Errors
///
/// Returns an error if building or running the `stratum` binary fails.
pub fn run_stratum(workdir: &Path, args: &[&str]) -> Result<RunResult, String> {
    let output = Command::new(stratum_binary()?)
        .current_dir(workdir)
        .env("NO_PAGER", "1")
        .env_remove("STRATUM_LOG")
        .args(args)
        .output()
        .map_err(|error| format!("failed to run stratum: {error}"))?;

    Ok(RunResult {
        command_line: std::iter::once("stratum")
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" "),
        exit_code: output.status.code().unwrap_or(1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Quote-safe, forward-slash form of `path` for a double-quoted YAML scalar.
#[must_use]
pub fn to_yaml_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace('"', "\\\"")
}

/// Build the binary once per test process and return its path next to the
/// test executable.
fn stratum_binary() -> Result<PathBuf, String> {
    STRATUM_BINARY
        .get_or_init(|| {
            let status = Command::new("cargo")
                .args(["build", "-q", "-p", "stratum"])
                .status()
                .map_err(|error| format!("failed to build stratum binary: {error}"))?;
            if !status.success() {
                return Err(format!(
                    "failed to build stratum binary: cargo exited with status {status}"
                ));
            }

            let mut dir = std::env::current_exe()
                .map_err(|error| format!("failed to determine current executable: {error}"))?;
            dir.pop();
            if dir.ends_with("deps") {
                dir.pop();
            }
            Ok(dir.join(format!("stratum{}", std::env::consts::EXE_SUFFIX)))
        })
        .clone()
}
