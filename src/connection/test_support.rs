//! Fake runtime CLI for connection tests.
//!
//! `singularity` in a scratch directory is a symlink to `/bin/sh`, and the
//! fake's behaviour lives in a script passed as the first global argument.
//! `exec -- instance://<name> <args...>` runs `<args...>` locally, so
//! "remote" paths are just paths on the test machine. Every invocation is
//! appended to a call log.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::ConnectionConfig;

pub struct FakeRuntime {
    dir: TempDir,
}

enum Instance {
    Running,
    /// Running, but `dd` is not on the instance's `PATH`.
    WithoutDd,
    /// Not running: every `exec` fails the way the real runtime does.
    Missing,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::build(Instance::Running)
    }

    /// A fake whose instance has no `dd`.
    pub fn without_dd() -> Self {
        Self::build(Instance::WithoutDd)
    }

    /// A fake whose instance does not exist; `--version` still works.
    pub fn missing_instance() -> Self {
        Self::build(Instance::Missing)
    }

    fn build(instance: Instance) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let calls = dir.path().join("calls.log");
        let before_exec = match instance {
            Instance::Running => "",
            Instance::WithoutDd => "PATH=/nonexistent\nexport PATH\n",
            Instance::Missing => {
                "echo \"FATAL: no instance found with name ${1#instance://}\" >&2\nexit 255\n"
            }
        };

        let script = format!(
            r#"echo "$*" >> '{calls}'
if [ "$1" = "--version" ]; then
    echo "singularity version 3.8.7-1.el8"
    exit 0
fi
if [ "$1" != "exec" ]; then
    echo "fake runtime: unexpected arguments: $*" >&2
    exit 64
fi
shift
if [ "$1" = "--" ]; then
    shift
fi
case "$1" in
    instance://?*) ;;
    *) echo "fake runtime: not an instance: $1" >&2; exit 255 ;;
esac
{before_exec}shift
exec "$@"
"#,
            calls = calls.display(),
            before_exec = before_exec,
        );
        std::fs::write(dir.path().join("fake-runtime.sh"), script).unwrap();
        std::os::unix::fs::symlink("/bin/sh", dir.path().join("singularity")).unwrap();

        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn program(&self) -> PathBuf {
        self.dir.path().join("singularity")
    }

    /// Configuration pointing at the fake by explicit path.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            executable_path: Some(self.program().display().to_string()),
            extra_args: vec![self.dir.path().join("fake-runtime.sh").display().to_string()],
            ..Default::default()
        }
    }

    /// Recorded invocations, one per line.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .map(|log| log.lines().map(String::from).collect())
            .unwrap_or_default()
    }
}

pub fn args(argv: &[&str]) -> Vec<String> {
    argv.iter().map(|s| s.to_string()).collect()
}
