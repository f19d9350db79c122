//! Process-based runtime
//!
//! Each execution gets a fresh scratch directory holding the source and test
//! files side by side, a cleared environment, rlimits and its own process
//! group. On Linux it also gets fresh user, network and mount namespaces: the
//! tests see read-only system directories, their workspace, and empty scratch
//! dirs, but no other host files. The whole group is killed when the run ends,
//! times out, or the execution future is dropped.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::output::{read_capped, CapturedStream};
use crate::types::{ExecutionOutcome, ExecutionRequest, TIMEOUT_EXIT_CODE};
use crate::Result;

#[cfg(target_os = "linux")]
mod jail;

/// How long output readers may lag behind process exit
const OUTPUT_GRACE: Duration = Duration::from_secs(2);
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
/// Holds the source and test files; cwd and HOME of the tests
const WORK_DIR: &str = "work";
/// Mount point of the private filesystem tree
const JAIL_ROOT: &str = "root";

/// Process-based runtime - runs the configured test command in a scratch dir
pub struct ProcessRuntime {
    config: SandboxConfig,
}

impl ProcessRuntime {
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// pytest runtime with default limits
    pub fn python() -> Self {
        Self {
            config: SandboxConfig::default(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    async fn prepare_workspace(&self, request: &ExecutionRequest) -> Result<tempfile::TempDir> {
        let dir = tempfile::Builder::new()
            .prefix("testgen-")
            .tempdir()
            .map_err(SandboxError::Workspace)?;

        let work = dir.path().join(WORK_DIR);
        for sub in [&work, &dir.path().join(JAIL_ROOT)] {
            tokio::fs::create_dir(sub)
                .await
                .map_err(SandboxError::Workspace)?;
        }
        tokio::fs::write(work.join(&self.config.source_file), &request.source_code)
            .await
            .map_err(SandboxError::Workspace)?;
        tokio::fs::write(work.join(&self.config.test_file), &request.test_code)
            .await
            .map_err(SandboxError::Workspace)?;
        if self.config.expose_solution_globals {
            tokio::fs::write(work.join("conftest.py"), conftest(self.config.source_module()))
                .await
                .map_err(SandboxError::Workspace)?;
        }

        Ok(dir)
    }

    fn build_command(&self, base: &Path) -> Result<Command> {
        let workdir: PathBuf = base.join(WORK_DIR);
        let search_path = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());
        let argv = self.config.resolved_command();
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&workdir)
            .env_clear()
            .env("PATH", &search_path)
            .env("HOME", &workdir)
            .env("TMPDIR", &workdir)
            .env("PYTHONPATH", &workdir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        isolation::apply(
            &mut cmd,
            &self.config,
            &workdir,
            &base.join(JAIL_ROOT),
            &search_path,
        )?;
        Ok(cmd)
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::python()
    }
}

#[async_trait]
impl super::Runtime for ProcessRuntime {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        let timeout = self.config.effective_timeout(request.timeout);
        let workspace = self.prepare_workspace(&request).await?;
        let mut cmd = self.build_command(workspace.path())?;

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: self.config.command[0].clone(),
            source,
        })?;
        let mut group = ProcessGroupGuard::new(child.id());
        debug!(pid = ?child.id(), timeout_ms = timeout.as_millis() as u64, "Spawned sandboxed process");

        let cap = self.config.limits.max_output_bytes;
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_capped(stdout, cap)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_capped(stderr, cap)));

        let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => (exit_code_of(status), false),
            Ok(Err(e)) => return Err(SandboxError::Wait(e)),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Execution timed out, killing process group");
                group.kill();
                let _ = child.start_kill();
                let _ = child.wait().await;
                (TIMEOUT_EXIT_CODE, true)
            }
        };
        // Background processes left behind by the tests go too.
        group.kill();
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;
        let truncated = stdout.truncated || stderr.truncated;

        if let Err(e) = workspace.close() {
            warn!(error = %e, "Failed to remove sandbox workspace");
        }

        if timed_out {
            return Ok(ExecutionOutcome::timed_out(
                stdout.text,
                stderr.text,
                truncated,
                duration_ms,
            ));
        }

        Ok(ExecutionOutcome {
            exit_code,
            stdout: stdout.text,
            stderr: stderr.text,
            timed_out: false,
            truncated,
            duration_ms,
        })
    }

    fn name(&self) -> &str {
        "process"
    }
}

/// Makes the submitted module's public names resolvable from the tests even
/// when the generated file forgot to import them. Builtins are never shadowed
/// and names the test module defines itself take precedence.
fn conftest(module: &str) -> String {
    format!(
        "import builtins as _builtins\n\
         import {module} as _solution\n\
         \n\
         for _name in dir(_solution):\n\
         \x20   if not _name.startswith(\"_\") and not hasattr(_builtins, _name):\n\
         \x20       setattr(_builtins, _name, getattr(_solution, _name))\n"
    )
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

async fn collect(task: Option<JoinHandle<CapturedStream>>) -> CapturedStream {
    let Some(mut task) = task else {
        return CapturedStream::default();
    };
    match tokio::time::timeout(OUTPUT_GRACE, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            CapturedStream::default()
        }
        Err(_) => {
            warn!("Output reader still open after process exit");
            task.abort();
            CapturedStream::default()
        }
    }
}

/// SIGKILLs the child's process group once, at the latest on drop
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            // SAFETY: killpg has no memory-safety preconditions; ESRCH is fine.
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
mod isolation {
    use std::io;
    use std::path::Path;

    use tokio::process::Command;

    use crate::config::SandboxConfig;
    use crate::error::SandboxError;
    use crate::limits::ResourceLimits;

    #[derive(Debug, Clone, Copy)]
    enum Limit {
        Cpu,
        AddressSpace,
        OpenFiles,
        FileSize,
    }

    fn planned_limits(limits: &ResourceLimits) -> Vec<(Limit, u64)> {
        [
            (Limit::Cpu, limits.max_cpu_time_secs),
            (Limit::AddressSpace, limits.max_memory_bytes),
            (Limit::OpenFiles, limits.max_open_files),
            (Limit::FileSize, limits.max_file_size_bytes),
        ]
        .into_iter()
        .filter_map(|(limit, value)| value.map(|v| (limit, v)))
        .collect()
    }

    pub(super) fn apply(
        cmd: &mut Command,
        config: &SandboxConfig,
        workdir: &Path,
        jail_root: &Path,
        search_path: &str,
    ) -> Result<(), SandboxError> {
        let limits = planned_limits(&config.limits);
        let namespace = namespace::Namespace::prepare(config, workdir, jail_root, search_path)?;
        tracing::debug!(
            network = %config.network,
            filesystem = %config.filesystem,
            namespaced = namespace.is_some(),
            "Applying sandbox isolation"
        );

        cmd.process_group(0);
        // SAFETY: runs between fork and exec. Only async-signal-safe libc calls
        // are made, on data allocated before the fork.
        unsafe {
            cmd.pre_exec(move || {
                for (limit, value) in &limits {
                    set_limit(*limit, *value)?;
                }
                if let Some(namespace) = &namespace {
                    namespace.enter()?;
                }
                Ok(())
            });
        }
        Ok(())
    }

    fn set_limit(limit: Limit, value: u64) -> io::Result<()> {
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let value = value as libc::rlim_t;

        // SAFETY: plain syscalls on a stack-allocated rlimit.
        let rc = unsafe {
            macro_rules! apply {
                ($resource:expr) => {{
                    if libc::getrlimit($resource, &mut current) != 0 {
                        -1
                    } else {
                        let capped = value.min(current.rlim_max);
                        let wanted = libc::rlimit {
                            rlim_cur: capped,
                            rlim_max: capped,
                        };
                        libc::setrlimit($resource, &wanted)
                    }
                }};
            }
            match limit {
                Limit::Cpu => apply!(libc::RLIMIT_CPU),
                Limit::AddressSpace => apply!(libc::RLIMIT_AS),
                Limit::OpenFiles => apply!(libc::RLIMIT_NOFILE),
                Limit::FileSize => apply!(libc::RLIMIT_FSIZE),
            }
        };

        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "linux")]
    mod namespace {
        use std::ffi::CStr;
        use std::io;
        use std::path::Path;

        use super::super::jail::Jail;
        use crate::config::SandboxConfig;
        use crate::error::SandboxError;
        use crate::policy::{FilesystemPolicy, NetworkPolicy};

        /// Namespaces to unshare, plus the uid/gid maps written from inside
        /// the new user namespace
        pub(super) struct Namespace {
            flags: libc::c_int,
            uid_map: Vec<u8>,
            gid_map: Vec<u8>,
            jail: Option<Jail>,
        }

        impl Namespace {
            pub(super) fn prepare(
                config: &SandboxConfig,
                workdir: &Path,
                jail_root: &Path,
                search_path: &str,
            ) -> Result<Option<Self>, SandboxError> {
                let jail = match config.filesystem {
                    FilesystemPolicy::Inherit => None,
                    FilesystemPolicy::Isolated => Some(Jail::prepare(
                        jail_root,
                        workdir,
                        &config.readonly_paths,
                        &config.command[0],
                        search_path,
                    )?),
                };
                let isolate_network = config.network == NetworkPolicy::Disabled;
                if jail.is_none() && !isolate_network {
                    return Ok(None);
                }

                let mut flags = libc::CLONE_NEWUSER;
                if isolate_network {
                    flags |= libc::CLONE_NEWNET;
                }
                if jail.is_some() {
                    flags |= libc::CLONE_NEWNS;
                }

                // SAFETY: getuid/getgid cannot fail.
                let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
                Ok(Some(Self {
                    flags,
                    uid_map: format!("{uid} {uid} 1\n").into_bytes(),
                    gid_map: format!("{gid} {gid} 1\n").into_bytes(),
                    jail,
                }))
            }

            pub(super) fn enter(&self) -> io::Result<()> {
                // SAFETY: unshare only affects the calling (forked) process.
                if unsafe { libc::unshare(self.flags) } != 0 {
                    return Err(io::Error::last_os_error());
                }
                write_proc_file(c"/proc/self/setgroups", b"deny")?;
                write_proc_file(c"/proc/self/uid_map", &self.uid_map)?;
                write_proc_file(c"/proc/self/gid_map", &self.gid_map)?;
                if let Some(jail) = &self.jail {
                    jail.enter()?;
                }
                Ok(())
            }
        }

        fn write_proc_file(path: &CStr, data: &[u8]) -> io::Result<()> {
            // SAFETY: path is NUL-terminated, data outlives the call.
            unsafe {
                let fd = libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC);
                if fd < 0 {
                    return Err(io::Error::last_os_error());
                }
                let written = libc::write(fd, data.as_ptr().cast(), data.len());
                let err = io::Error::last_os_error();
                libc::close(fd);
                if written < 0 || written as usize != data.len() {
                    return Err(err);
                }
            }
            Ok(())
        }
    }

    #[cfg(not(target_os = "linux"))]
    mod namespace {
        use std::io;
        use std::path::Path;

        use crate::config::SandboxConfig;
        use crate::error::SandboxError;

        pub(super) struct Namespace;

        impl Namespace {
            pub(super) fn prepare(
                config: &SandboxConfig,
                _workdir: &Path,
                _jail_root: &Path,
                _search_path: &str,
            ) -> Result<Option<Self>, SandboxError> {
                super::super::require_inherited(config)?;
                Ok(None)
            }

            pub(super) fn enter(&self) -> io::Result<()> {
                Ok(())
            }
        }
    }
}

#[cfg(not(unix))]
mod isolation {
    use std::path::Path;

    use tokio::process::Command;

    use crate::config::SandboxConfig;
    use crate::error::SandboxError;

    pub(super) fn apply(
        _cmd: &mut Command,
        config: &SandboxConfig,
        _workdir: &Path,
        _jail_root: &Path,
        _search_path: &str,
    ) -> Result<(), SandboxError> {
        super::require_inherited(config)
    }
}

/// Reject policies that need Linux namespaces
#[cfg(not(target_os = "linux"))]
fn require_inherited(config: &SandboxConfig) -> Result<()> {
    use crate::policy::{FilesystemPolicy, NetworkPolicy};

    if config.network == NetworkPolicy::Disabled {
        return Err(SandboxError::Config(
            "network isolation needs Linux namespaces; set network = \"inherit\"".to_string(),
        ));
    }
    if config.filesystem == FilesystemPolicy::Isolated {
        return Err(SandboxError::Config(
            "filesystem isolation needs Linux namespaces; set filesystem = \"inherit\"".to_string(),
        ));
    }
    Ok(())
}
