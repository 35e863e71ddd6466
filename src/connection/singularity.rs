//! Singularity instance connection.
//!
//! Every operation is a single, short-lived `singularity exec` child against
//! the resolved instance. There is no persistent connection: the runtime CLI
//! is stateless per invocation, so "connecting" only parses the target,
//! locates the binary and probes what the runtime and instance can do.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::registry::TransportFactory;
use super::transfer::{normalize_remote_path, TransferStrategy};
use super::{CommandOutput, Connection};
use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};
use crate::process::{self, Input, Output, ProcessOutput};
use crate::runtime::RuntimeCli;
use crate::target::InstanceRef;
use crate::utils::format_bytes;

/// Registry key for this transport.
pub const TRANSPORT_NAME: &str = "singularity";

/// Shell snippet that prints the transfer strategy the instance supports.
const TRANSFER_PROBE: &str = "if command -v dd >/dev/null 2>&1; then echo dd; else echo cat; fi";

/// A session bound to one Singularity instance.
#[derive(Debug)]
pub struct SingularityConnection {
    instance: InstanceRef,
    runtime: RuntimeCli,
    version: Option<String>,
    transfer: TransferStrategy,
    shell: String,
    timeout: Option<Duration>,
    closed: bool,
}

impl SingularityConnection {
    /// Connect to `target` (`instance://<name>`), finding the runtime on `PATH`.
    pub async fn connect(target: &str, config: &ConnectionConfig) -> Result<Self> {
        Self::connect_in(target, config, std::env::var_os("PATH")).await
    }

    /// Connect using an explicit executable search path.
    ///
    /// The target and configuration are checked before anything is spawned.
    pub async fn connect_in(
        target: &str,
        config: &ConnectionConfig,
        search_path: Option<OsString>,
    ) -> Result<Self> {
        let instance = InstanceRef::parse(target)?;
        config.validate()?;
        let runtime = RuntimeCli::locate_in(config, search_path)?;

        if let Some(user) = &config.remote_user {
            tracing::warn!(
                "Singularity does not support different users inside the instance; \
                 passing '{}' through as REMOTE_USER",
                user
            );
        }

        let timeout = config.timeout();
        let version = runtime.version(timeout).await;

        let mut connection = Self {
            instance,
            runtime,
            version,
            transfer: TransferStrategy::Dd,
            shell: config.shell.clone(),
            timeout,
            closed: false,
        };

        connection.transfer = match config.transfer.explicit() {
            Some(strategy) => strategy,
            None => connection.probe_transfer().await?,
        };

        tracing::info!(
            "Connected to {} (runtime {}, version {}, transfer via {})",
            connection.instance,
            connection.runtime.program().display(),
            connection.version.as_deref().unwrap_or("unknown"),
            connection.transfer
        );

        Ok(connection)
    }

    pub fn instance(&self) -> &InstanceRef {
        &self.instance
    }

    pub fn program(&self) -> &Path {
        self.runtime.program()
    }

    /// Runtime version reported at connect time, if it could be determined.
    pub fn runtime_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn transfer_strategy(&self) -> TransferStrategy {
        self.transfer
    }

    /// Run a shell command string as `<shell> -c <command>` inside the instance.
    pub async fn execute_shell(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let args = vec![self.shell.clone(), "-c".to_string(), command.to_string()];
        self.execute(&args, stdin).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(ConnectionError::Closed {
                target: self.instance.to_string(),
            });
        }
        Ok(())
    }

    async fn run_exec(
        &self,
        args: &[String],
        input: Input<'_>,
        output: Output,
    ) -> Result<ProcessOutput> {
        let command = self.runtime.exec_command(&self.instance, args);
        let label = self.runtime.describe_exec(&self.instance, args);
        process::run(command, &label, input, output, self.timeout).await
    }

    /// Ask the instance which transfer strategy it supports.
    ///
    /// Anything other than a clean answer on stdout is a runtime failure
    /// (e.g. the instance is not running) and is reported with its stderr.
    async fn probe_transfer(&self) -> Result<TransferStrategy> {
        let args = vec![self.shell.clone(), "-c".to_string(), TRANSFER_PROBE.to_string()];
        let output = self.run_exec(&args, Input::Null, Output::Capture).await?;
        let answer = String::from_utf8_lossy(&output.stdout);

        match (output.exit_code, answer.trim()) {
            (0, "dd") => Ok(TransferStrategy::Dd),
            (0, "cat") => {
                tracing::debug!("dd not available in {}, falling back to cat", self.instance);
                Ok(TransferStrategy::Cat)
            }
            (code, _) => Err(ConnectionError::execution(
                self.runtime.describe_exec(&self.instance, &args),
                format!(
                    "transfer probe failed (exit code {}): {}",
                    code,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            )),
        }
    }

    fn remote_display(&self, remote_path: &str) -> String {
        format!("{}:{}", self.instance, remote_path)
    }
}

#[async_trait]
impl Connection for SingularityConnection {
    fn transport(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn execute(&mut self, args: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        self.ensure_open()?;

        if args.is_empty() {
            return Err(ConnectionError::execution(
                self.instance.to_string(),
                "empty command",
            ));
        }

        let input = match stdin {
            Some(bytes) => Input::Bytes(bytes),
            None => Input::Null,
        };

        let output = self.run_exec(args, input, Output::Capture).await?;

        Ok(CommandOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn put_file(&mut self, local_path: &Path, remote_path: &str) -> Result<()> {
        self.ensure_open()?;

        let remote_path = normalize_remote_path(remote_path);
        let remote = self.remote_display(&remote_path);
        tracing::info!("PUT {} TO {}", local_path.display(), remote);

        let not_found = |source: std::io::Error| ConnectionError::LocalFileNotFound {
            path: local_path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(local_path).await.map_err(not_found)?;
        let metadata = file.metadata().await.map_err(not_found)?;
        if metadata.is_dir() {
            return Err(not_found(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "is a directory",
            )));
        }

        let args = self.transfer.upload_args(&remote_path);
        let output = self
            .run_exec(&args, Input::File(file.into_std().await), Output::Discard)
            .await?;

        if output.exit_code != 0 {
            return Err(ConnectionError::transfer(
                local_path.display().to_string(),
                remote,
                Some(output.exit_code),
                &output.stderr,
            ));
        }

        tracing::debug!("Uploaded {} to {}", format_bytes(metadata.len()), remote);
        Ok(())
    }

    async fn fetch_file(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.ensure_open()?;

        let remote_path = normalize_remote_path(remote_path);
        let remote = self.remote_display(&remote_path);
        tracing::info!("FETCH {} TO {}", remote, local_path.display());

        if let Some(parent) = local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // An existing destination is only replaced once the copy succeeded.
        let partial = partial_path(local_path)?;
        let file = tokio::fs::File::create(&partial).await?.into_std().await;
        let args = self.transfer.download_args(&remote_path);

        let output = match self.run_exec(&args, Input::Null, Output::File(file)).await {
            Ok(output) => output,
            Err(e) => {
                remove_partial(&partial).await;
                return Err(e);
            }
        };

        if output.exit_code != 0 {
            remove_partial(&partial).await;
            return Err(ConnectionError::transfer(
                remote,
                local_path.display().to_string(),
                Some(output.exit_code),
                &output.stderr,
            ));
        }

        if let Err(e) = tokio::fs::rename(&partial, local_path).await {
            remove_partial(&partial).await;
            return Err(e.into());
        }

        if let Ok(metadata) = tokio::fs::metadata(local_path).await {
            tracing::debug!("Fetched {} from {}", format_bytes(metadata.len()), remote);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            tracing::debug!("Closed connection to {}", self.instance);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Sibling of `path` that a fetch writes into before renaming.
fn partial_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} does not name a file", path.display()),
        )
    })?;

    let mut partial = std::ffi::OsString::from(".");
    partial.push(name);
    partial.push(".partial");
    Ok(path.with_file_name(partial))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!("Could not remove partial file {}: {}", path.display(), e);
    }
}

/// Creates [`SingularityConnection`]s for the registry.
pub struct SingularityFactory;

#[async_trait]
impl TransportFactory for SingularityFactory {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn connect(
        &self,
        target: &str,
        config: &ConnectionConfig,
    ) -> Result<Box<dyn Connection>> {
        let connection = SingularityConnection::connect(target, config).await?;
        Ok(Box::new(connection))
    }
}

/// Default location for a fetched file: `<dest_dir>/<instance>/<remote path>`.
///
/// Mirrors how orchestration engines lay out per-host fetch results.
pub fn fetch_destination(dest_dir: &Path, instance: &InstanceRef, remote_path: &str) -> PathBuf {
    let remote_path = normalize_remote_path(remote_path);
    dest_dir
        .join(instance.name())
        .join(remote_path.trim_start_matches('/'))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::connection::test_support::{args, FakeRuntime};
    use crate::connection::transfer::TransferMethod;

    async fn connect(fake: &FakeRuntime, target: &str) -> SingularityConnection {
        SingularityConnection::connect(target, &fake.config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_extracts_instance_name() {
        let fake = FakeRuntime::new();
        let conn = connect(&fake, "instance://web1").await;

        assert_eq!(conn.instance().name(), "web1");
        assert_eq!(conn.runtime_version(), Some("3.8.7-1.el8"));
        assert_eq!(conn.transfer_strategy(), TransferStrategy::Dd);
        assert_eq!(conn.transport(), "singularity");
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_echo_hello() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        let output = conn.execute(&args(&["echo", "hello"]), None).await.unwrap();
        assert_eq!(
            output,
            CommandOutput {
                exit_code: 0,
                stdout: b"hello\n".to_vec(),
                stderr: Vec::new(),
            }
        );

        let last = fake.calls().pop().unwrap();
        assert!(last.ends_with("exec -- instance://web1 echo hello"), "{}", last);
    }

    #[tokio::test]
    async fn test_large_stdout_is_not_truncated() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        let size = 2 * 1024 * 1024;
        let output = conn
            .execute(&args(&["head", "-c", &size.to_string(), "/dev/zero"]), None)
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.len(), size);
        assert!(output.stdout.iter().all(|b| *b == 0));
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded_and_closed() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        let input: Vec<u8> = (0..1024 * 1024).map(|i| (i % 256) as u8).collect();
        let output = conn.execute(&args(&["cat"]), Some(&input)).await.unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, input);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_data() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        let output = conn
            .execute_shell("echo oops >&2; exit 3", None)
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert!(output.stdout.is_empty());
        assert_eq!(output.stderr, b"oops\n");
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_expanded() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        let output = conn
            .execute(
                &args(&["printf", "%s\\n", "$HOME", "a b", "*", "; rm -rf /"]),
                None,
            )
            .await
            .unwrap();

        assert_eq!(output.stdout_lossy(), "$HOME\na b\n*\n; rm -rf /\n");
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;
        let before = fake.calls().len();

        let err = conn.execute(&[], None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Execution { .. }));
        assert_eq!(fake.calls().len(), before);
    }

    #[tokio::test]
    async fn test_invalid_targets_spawn_nothing() {
        let fake = FakeRuntime::new();

        for target in ["foo://bar", "instance://", "web1", "://web1", "instance:web1"] {
            let err = SingularityConnection::connect(target, &fake.config())
                .await
                .unwrap_err();
            assert!(
                matches!(err, ConnectionError::InvalidTarget { .. }),
                "{}: {}",
                target,
                err
            );
        }

        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_missing_from_search_path() {
        let empty = tempfile::tempdir().unwrap();
        let err = SingularityConnection::connect_in(
            "instance://web1",
            &ConnectionConfig::default(),
            Some(empty.path().as_os_str().to_owned()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConnectionError::RuntimeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_runtime_found_on_search_path() {
        let fake = FakeRuntime::new();
        let config = ConnectionConfig {
            executable_path: None,
            ..fake.config()
        };

        let conn = SingularityConnection::connect_in(
            "instance://web1",
            &config,
            Some(fake.dir().as_os_str().to_owned()),
        )
        .await
        .unwrap();

        assert_eq!(conn.program(), fake.program().as_path());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_spawning() {
        let fake = FakeRuntime::new();
        let config = ConnectionConfig {
            timeout: Some("whenever".to_string()),
            ..fake.config()
        };

        let err = SingularityConnection::connect("instance://web1", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Config(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_put_then_fetch_round_trips_binary_content() {
        for method in [TransferMethod::Dd, TransferMethod::Cat] {
            let fake = FakeRuntime::new();
            let config = ConnectionConfig {
                transfer: method,
                ..fake.config()
            };
            let mut conn = SingularityConnection::connect("instance://web1", &config)
                .await
                .unwrap();

            let work = tempfile::tempdir().unwrap();
            let content: Vec<u8> = (0..200_000u32)
                .map(|i| if i % 7 == 0 { 0 } else { (i % 256) as u8 })
                .collect();
            let local = work.path().join("source.bin");
            std::fs::write(&local, &content).unwrap();

            std::fs::create_dir(work.path().join("remote")).unwrap();
            let remote = work.path().join("remote").join("file.bin");
            let remote = remote.to_str().unwrap();

            conn.put_file(&local, remote).await.unwrap();

            let fetched = work.path().join("local").join("nested").join("copy.bin");
            conn.fetch_file(remote, &fetched).await.unwrap();

            assert_eq!(std::fs::read(&fetched).unwrap(), content, "{:?}", method);
        }
    }

    #[tokio::test]
    async fn test_put_missing_local_file() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;
        let work = tempfile::tempdir().unwrap();

        let err = conn
            .put_file(&work.path().join("missing.txt"), "/tmp/x")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::LocalFileNotFound { .. }));

        let err = conn.put_file(work.path(), "/tmp/x").await.unwrap_err();
        assert!(matches!(err, ConnectionError::LocalFileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_put_into_missing_remote_directory_fails() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;
        let work = tempfile::tempdir().unwrap();
        let local = work.path().join("a.txt");
        std::fs::write(&local, "data").unwrap();

        let remote = work.path().join("no-such-dir").join("a.txt");
        let err = conn
            .put_file(&local, remote.to_str().unwrap())
            .await
            .unwrap_err();

        match err {
            ConnectionError::Transfer { exit_code, stderr, .. } => {
                assert_ne!(exit_code, Some(0));
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_missing_remote_file_leaves_nothing_behind() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;
        let work = tempfile::tempdir().unwrap();

        let remote = work.path().join("absent.txt");
        let local = work.path().join("out").join("absent.txt");
        let err = conn
            .fetch_file(remote.to_str().unwrap(), &local)
            .await
            .unwrap_err();

        match err {
            ConnectionError::Transfer { stderr, .. } => assert!(!stderr.is_empty()),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!local.exists());
        assert_eq!(std::fs::read_dir(local.parent().unwrap()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_existing_local_file() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;
        let work = tempfile::tempdir().unwrap();

        let local = work.path().join("hosts");
        std::fs::write(&local, "127.0.0.1 localhost\n").unwrap();

        let remote = work.path().join("absent.txt");
        let err = conn
            .fetch_file(remote.to_str().unwrap(), &local)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectionError::Transfer { .. }));
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "127.0.0.1 localhost\n");
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_replaces_existing_local_file() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;
        let work = tempfile::tempdir().unwrap();

        let remote = work.path().join("remote.txt");
        std::fs::write(&remote, "new").unwrap();
        let local = work.path().join("local.txt");
        std::fs::write(&local, "old and longer").unwrap();

        conn.fetch_file(remote.to_str().unwrap(), &local)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&local).unwrap(), "new");
        assert!(!work.path().join(".local.txt.partial").exists());
    }

    #[test]
    fn test_partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/out/web1/etc/hosts")).unwrap(),
            PathBuf::from("/out/web1/etc/.hosts.partial")
        );
        assert!(partial_path(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());

        let err = conn.execute(&args(&["true"]), None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_terminates_command() {
        let fake = FakeRuntime::new();
        let config = ConnectionConfig {
            timeout: Some("1s".to_string()),
            transfer: TransferMethod::Dd,
            ..fake.config()
        };
        let mut conn = SingularityConnection::connect("instance://web1", &config)
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = conn.execute(&args(&["sleep", "30"]), None).await.unwrap_err();

        assert!(matches!(err, ConnectionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_runtime_vanishing_mid_session_is_execution_error() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        std::fs::remove_file(fake.program()).unwrap();

        let err = conn.execute(&args(&["true"]), None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_killed_command_is_execution_error() {
        let fake = FakeRuntime::new();
        let mut conn = connect(&fake, "instance://web1").await;

        let err = conn
            .execute(&args(&["sh", "-c", "kill -9 $$"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_remote_user_is_passed_as_environment() {
        let fake = FakeRuntime::new();
        let config = ConnectionConfig {
            remote_user: Some("deploy".to_string()),
            ..fake.config()
        };
        let mut conn = SingularityConnection::connect("instance://web1", &config)
            .await
            .unwrap();

        let output = conn
            .execute_shell("printf %s \"$SINGULARITYENV_REMOTE_USER\"", None)
            .await
            .unwrap();
        assert_eq!(output.stdout, b"deploy");
    }

    #[tokio::test]
    async fn test_auto_transfer_falls_back_to_cat() {
        let fake = FakeRuntime::without_dd();
        let conn = connect(&fake, "instance://web1").await;
        assert_eq!(conn.transfer_strategy(), TransferStrategy::Cat);
    }

    #[tokio::test]
    async fn test_auto_transfer_reports_runtime_failure() {
        let fake = FakeRuntime::missing_instance();
        let err = SingularityConnection::connect("instance://web1", &fake.config())
            .await
            .unwrap_err();

        match err {
            ConnectionError::Execution { message, .. } => {
                assert!(message.contains("exit code 255"), "{}", message);
                assert!(
                    message.contains("FATAL: no instance found with name web1"),
                    "{}",
                    message
                );
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_explicit_transfer_skips_detection() {
        let fake = FakeRuntime::new();
        let config = ConnectionConfig {
            transfer: TransferMethod::Cat,
            ..fake.config()
        };
        let conn = SingularityConnection::connect("instance://web1", &config)
            .await
            .unwrap();

        assert_eq!(conn.transfer_strategy(), TransferStrategy::Cat);
        assert!(fake.calls().iter().all(|call| !call.contains("command -v dd")));
    }

    #[test]
    fn test_fetch_destination() {
        let instance = InstanceRef::parse("instance://web1").unwrap();
        assert_eq!(
            fetch_destination(Path::new("/out"), &instance, "etc/../etc/hosts"),
            PathBuf::from("/out/web1/etc/hosts")
        );
    }
}
