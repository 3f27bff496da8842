// Process sandboxing
// Spawns child processes under a security policy: command and path
// validation, resource limits, monitoring, and audited termination

use crate::audit::AuditLog;
use crate::constants::driver::TERMINATE_GRACE_SECONDS;
use crate::constants::driver::WALL_TIMEOUT_SECONDS;
use crate::constants::sandbox::MONITOR_INTERVAL_MS;
use crate::error::{CoreError, Result};
use crate::utils::format_bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use uuid::Uuid;

/// Security policy for sandboxed child processes
///
/// Resource ceilings, a filesystem ACL, and command restrictions. Deny
/// always wins over allow; an empty allow set means "anything not denied".
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    /// CPU usage ceiling in percent (poll-enforced)
    pub cpu_limit: Option<f32>,

    /// Resident memory ceiling in bytes
    pub memory_limit: Option<u64>,

    /// Largest file the child may create, in bytes
    pub file_size_limit: Option<u64>,

    /// Cap on tasks the child may own (RLIMIT_NPROC counts threads too;
    /// leave unset for multi-threaded transcoders)
    pub process_count_limit: Option<u32>,

    /// Wall-clock limit for the child
    pub wall_timeout: Duration,

    /// Whether a wall timeout escalates to termination
    pub kill_on_timeout: bool,

    /// Whether a monitored resource breach escalates to termination
    pub terminate_on_violation: bool,

    /// Whether command arguments are scanned for shell metacharacters
    pub validate_args: bool,

    /// Whether the child may reach the network
    pub network_access: bool,

    /// Whether to drop privileges before exec (recorded; see spawn)
    pub reduce_privileges: bool,

    allowed_read_paths: BTreeSet<PathBuf>,
    allowed_write_paths: BTreeSet<PathBuf>,
    denied_paths: BTreeSet<PathBuf>,
    allowed_commands: BTreeSet<String>,
    denied_commands: BTreeSet<String>,
    whitelist_patterns: Vec<Regex>,
    blacklist_patterns: Vec<Regex>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            cpu_limit: None,
            memory_limit: None,
            file_size_limit: None,
            process_count_limit: None,
            wall_timeout: Duration::from_secs(WALL_TIMEOUT_SECONDS),
            kill_on_timeout: true,
            terminate_on_violation: false,
            validate_args: true,
            network_access: false,
            reduce_privileges: true,
            allowed_read_paths: BTreeSet::new(),
            allowed_write_paths: BTreeSet::new(),
            denied_paths: BTreeSet::new(),
            allowed_commands: BTreeSet::new(),
            denied_commands: BTreeSet::new(),
            whitelist_patterns: Vec::new(),
            blacklist_patterns: Vec::new(),
        }
    }
}

impl SandboxPolicy {
    /// Add a path prefix to the allowed read set
    pub fn allow_read_path(&mut self, path: impl Into<PathBuf>) {
        self.allowed_read_paths.insert(path.into());
    }

    /// Add a path prefix to the allowed write set
    pub fn allow_write_path(&mut self, path: impl Into<PathBuf>) {
        self.allowed_write_paths.insert(path.into());
    }

    /// Add a path prefix to the deny set; deny overrides allow
    pub fn deny_path(&mut self, path: impl Into<PathBuf>) {
        self.denied_paths.insert(path.into());
    }

    /// Allow a command by exact path or name
    pub fn allow_command(&mut self, command: impl Into<String>) {
        self.allowed_commands.insert(command.into());
    }

    /// Deny a command by exact path or name
    pub fn deny_command(&mut self, command: impl Into<String>) {
        self.denied_commands.insert(command.into());
    }

    /// Add a regex to the command whitelist
    pub fn allow_command_pattern(&mut self, pattern: &str) -> Result<()> {
        self.whitelist_patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    /// Add a regex to the command blacklist
    pub fn deny_command_pattern(&mut self, pattern: &str) -> Result<()> {
        self.blacklist_patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    /// Check a resolved command against the deny/allow sets and patterns
    ///
    /// Denied names and blacklist patterns reject outright. When a whitelist
    /// exists (exact names or patterns) the command must match it; with no
    /// whitelist any non-denied command passes.
    pub fn is_command_allowed(&self, command: &Path) -> bool {
        let full = command.to_string_lossy();
        let name = command
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if self.denied_commands.contains(full.as_ref()) || self.denied_commands.contains(&name) {
            return false;
        }
        for pattern in &self.blacklist_patterns {
            if pattern.is_match(&full) {
                return false;
            }
        }

        if !self.allowed_commands.is_empty() || !self.whitelist_patterns.is_empty() {
            if self.allowed_commands.contains(full.as_ref())
                || self.allowed_commands.contains(&name)
            {
                return true;
            }
            for pattern in &self.whitelist_patterns {
                if pattern.is_match(&full) {
                    return true;
                }
            }
            return false;
        }

        true
    }

    /// Check whether a path may be read under this policy
    pub fn is_path_allowed_read(&self, path: &Path) -> bool {
        if self.is_denied(path) {
            return false;
        }
        if self.allowed_read_paths.is_empty() {
            return true;
        }
        self.allowed_read_paths
            .iter()
            .any(|allowed| path.starts_with(allowed))
    }

    /// Check whether a path may be written under this policy
    pub fn is_path_allowed_write(&self, path: &Path) -> bool {
        if self.is_denied(path) {
            return false;
        }
        if self.allowed_write_paths.is_empty() {
            return true;
        }
        self.allowed_write_paths
            .iter()
            .any(|allowed| path.starts_with(allowed))
    }

    fn is_denied(&self, path: &Path) -> bool {
        self.denied_paths
            .iter()
            .any(|denied| path.starts_with(denied))
    }
}

/// Shell metacharacters rejected in command arguments
fn has_shell_metacharacters(arg: &str) -> bool {
    arg.chars()
        .any(|c| matches!(c, ';' | '&' | '|' | '`' | '$' | '>' | '<'))
}

/// Whether an argument is path-shaped (contains a separator or starts
/// with a dot component)
fn looks_like_path(arg: &str) -> bool {
    arg.contains(std::path::MAIN_SEPARATOR) || arg.contains('/') || arg.starts_with('.')
}

/// Resolve relative components lexically against a working directory
///
/// Does not touch the filesystem, so output paths that do not exist yet can
/// still be checked. `..` components are resolved away, which is what makes
/// an escape attempt land outside the allow sets.
fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Search PATH and common locations for a bare command name
fn resolve_binary(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    if name.contains(std::path::MAIN_SEPARATOR) {
        let abs = absolutize(candidate, &std::env::current_dir().ok()?);
        return abs.is_file().then_some(abs);
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let full = dir.join(name);
        if full.is_file() {
            return Some(full);
        }
    }
    None
}

/// Terminal and non-terminal states of a sandboxed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Child is running
    Running,
    /// Child exited on its own with this code (None if signalled)
    Exited(Option<i32>),
    /// Child stopped after a graceful termination request
    Terminated,
    /// Child had to be force-killed
    Killed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }
}

/// Point-in-time resource usage of a monitored process
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceUsage {
    /// CPU usage in percent of one core
    pub cpu_percent: f32,

    /// Resident memory in bytes
    pub memory_bytes: u64,
}

/// Final bookkeeping for one sandboxed process
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub id: String,
    pub pid: u32,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub usage: ResourceUsage,
}

/// Control handle for a sandboxed child
///
/// The `Child` itself stays with the spawner (it owns stderr and the exit
/// code); the handle is what the registry and the shutdown path hold on to.
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct ProcessHandle {
    id: String,
    pid: u32,
    started_at: DateTime<Utc>,
    status_tx: Arc<watch::Sender<ProcessStatus>>,
    ended_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    usage: Arc<Mutex<ResourceUsage>>,
    violation: Arc<Mutex<Option<String>>>,
    audit: AuditLog,
}

impl ProcessHandle {
    fn new(id: String, pid: u32, audit: AuditLog) -> Self {
        let (status_tx, _) = watch::channel(ProcessStatus::Running);
        Self {
            id,
            pid,
            started_at: Utc::now(),
            status_tx: Arc::new(status_tx),
            ended_at: Arc::new(Mutex::new(None)),
            usage: Arc::new(Mutex::new(ResourceUsage::default())),
            violation: Arc::new(Mutex::new(None)),
            audit,
        }
    }

    /// Correlation id for audit records
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current status
    pub fn status(&self) -> ProcessStatus {
        *self.status_tx.borrow()
    }

    /// Latest sampled resource usage
    pub fn usage(&self) -> ResourceUsage {
        self.usage
            .lock()
            .map(|u| *u)
            .unwrap_or_default()
    }

    /// Reason recorded by the monitor when a resource breach forced
    /// termination; None for every other way a process can end
    pub fn violation(&self) -> Option<String> {
        self.violation.lock().ok().and_then(|v| v.clone())
    }

    fn set_violation(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.violation.lock() {
            slot.get_or_insert_with(|| reason.into());
        }
    }

    /// Final bookkeeping snapshot
    pub fn result_snapshot(&self) -> ProcessSnapshot {
        ProcessSnapshot {
            id: self.id.clone(),
            pid: self.pid,
            status: self.status(),
            started_at: self.started_at,
            ended_at: self.ended_at.lock().ok().and_then(|e| *e),
            usage: self.usage(),
        }
    }

    /// Wait until the process reaches a terminal status
    ///
    /// Returns the terminal status, or None if the deadline passed first.
    pub async fn wait(&self, deadline: Option<Duration>) -> Option<ProcessStatus> {
        let mut rx = self.status_tx.subscribe();
        let wait_terminal = async move {
            loop {
                let status = *rx.borrow_and_update();
                if status.is_terminal() {
                    return status;
                }
                if rx.changed().await.is_err() {
                    return status;
                }
            }
        };
        match deadline {
            Some(d) => tokio::time::timeout(d, wait_terminal).await.ok(),
            None => Some(wait_terminal.await),
        }
    }

    /// Gracefully stop the process: signal, wait `grace`, then force-kill
    ///
    /// Idempotent; calling it on a finished process does nothing. The owner
    /// still reaps the child and records the exit code. A process that was
    /// reaped elsewhere during the grace period is never force-killed, so a
    /// recycled pid cannot be hit.
    pub async fn terminate(&self, grace: Duration) {
        if self.status().is_terminal() {
            return;
        }
        self.audit.record(
            "sandbox.process_terminate",
            Some(&self.id),
            json!({ "pid": self.pid, "grace_ms": grace.as_millis() as u64 }),
        );

        send_signal(self.pid, Signal::Stop);
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.wait(Some(Duration::from_millis(50))).await.is_some()
                || !process_alive(self.pid)
            {
                self.mark(ProcessStatus::Terminated);
                return;
            }
        }

        warn!("process {} survived grace period, force-killing", self.id);
        send_signal(self.pid, Signal::Kill);
        self.mark(ProcessStatus::Killed);
    }

    /// Record the exit observed by the owner after reaping the child
    pub fn mark_exited(&self, exit_code: Option<i32>) {
        self.mark(ProcessStatus::Exited(exit_code));
    }

    fn mark(&self, status: ProcessStatus) {
        // First terminal status wins; later marks are no-ops
        self.status_tx.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = status;
            true
        });
        if let Ok(mut ended) = self.ended_at.lock() {
            ended.get_or_insert_with(Utc::now);
        }
    }

    fn set_usage(&self, usage: ResourceUsage) {
        if let Ok(mut slot) = self.usage.lock() {
            *slot = usage;
        }
    }
}

enum Signal {
    Stop,
    Kill,
}

/// Deliver a stop or kill signal to a pid
#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) {
    let sig = match signal {
        Signal::Stop => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    unsafe {
        libc::kill(pid as i32, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, _signal: Signal) {
    // No graceful stop available; kill_on_drop covers the force path
}

/// Whether the pid still names a live (or zombie) process
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// A spawned child plus its control handle
pub struct SpawnedChild {
    /// Owned by the spawner: stderr stream and exit status live here
    pub child: Child,

    /// Registered control handle
    pub handle: ProcessHandle,
}

/// Factory and registry for sandboxed processes
///
/// Every spawn is validated against its policy, registered, monitored, and
/// audited. The registry lets a global shutdown terminate everything that
/// is still alive.
pub struct ProcessSandbox {
    registry: Mutex<HashMap<String, ProcessHandle>>,
    audit: AuditLog,
}

impl ProcessSandbox {
    pub fn new(audit: AuditLog) -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            audit,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Validate a command line against a policy without spawning
    ///
    /// Returns the resolved binary path. Rejections are audited.
    ///
    /// # Errors
    /// `CoreError::PolicyDenied` with the reason for the rejection
    pub fn validate(
        &self,
        cmd: &[String],
        policy: &SandboxPolicy,
        cwd: &Path,
    ) -> Result<PathBuf> {
        match self.validate_inner(cmd, policy, cwd) {
            Ok(binary) => Ok(binary),
            Err(reason) => {
                self.audit.record(
                    "sandbox.validation_failure",
                    None,
                    json!({ "command": cmd, "error": reason }),
                );
                Err(CoreError::PolicyDenied(reason))
            }
        }
    }

    fn validate_inner(
        &self,
        cmd: &[String],
        policy: &SandboxPolicy,
        cwd: &Path,
    ) -> std::result::Result<PathBuf, String> {
        let Some(program) = cmd.first().filter(|p| !p.is_empty()) else {
            return Err("empty command".to_string());
        };

        let binary = resolve_binary(program)
            .ok_or_else(|| format!("command not found: {}", program))?;

        if !policy.is_command_allowed(&binary) {
            return Err(format!(
                "command not allowed by policy: {}",
                binary.display()
            ));
        }

        for arg in &cmd[1..] {
            if policy.validate_args && has_shell_metacharacters(arg) {
                return Err(format!("suspicious command argument: {}", arg));
            }

            // Path-shaped arguments must fall inside the ACL. An argument is
            // acceptable as either a readable input or a writable output;
            // deny wins over both.
            if looks_like_path(arg) {
                let resolved = absolutize(Path::new(arg), cwd);
                if !policy.is_path_allowed_read(&resolved)
                    && !policy.is_path_allowed_write(&resolved)
                {
                    return Err(format!("path not allowed by policy: {}", resolved.display()));
                }
            }
        }

        Ok(binary)
    }

    /// Spawn a child under a policy
    ///
    /// Applies resource limits before exec where the platform supports it,
    /// registers the process, and starts a monitor that polls usage once a
    /// second. The caller keeps the `Child` (stderr, exit status); the
    /// handle is what `terminate_all` reaches.
    ///
    /// # Errors
    /// `CoreError::PolicyDenied` when validation rejects the command,
    /// `CoreError::Process` when the OS refuses to spawn it
    pub fn spawn(
        &self,
        cmd: &[String],
        policy: &SandboxPolicy,
        cwd: Option<&Path>,
    ) -> Result<SpawnedChild> {
        let current_dir = match cwd {
            Some(d) => d.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let binary = self.validate(cmd, policy, &current_dir)?;
        let id = format!("sandbox-{}", Uuid::new_v4());

        let mut command = Command::new(&binary);
        command
            .args(&cmd[1..])
            .current_dir(&current_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("HLSMILL_SANDBOX", "1")
            .env("HLSMILL_SANDBOX_ID", &id);

        if !policy.network_access {
            // Best-effort network fence: point proxy-aware tools at a dead
            // endpoint. Not airtight, but cuts off the common paths.
            command
                .env("http_proxy", "http://localhost:1")
                .env("https_proxy", "http://localhost:1")
                .env("no_proxy", "localhost,127.0.0.1");
        }

        #[cfg(unix)]
        apply_resource_limits(&mut command, policy);

        let mut child = command.spawn().map_err(|e| {
            self.audit.record(
                "sandbox.process_error",
                Some(&id),
                json!({ "command": cmd, "error": e.to_string() }),
            );
            CoreError::Process(format!("failed to spawn {}: {}", binary.display(), e))
        })?;

        let pid = child.id().ok_or_else(|| {
            // Spawn raced with exit before we could observe the pid
            let _ = child.start_kill();
            CoreError::Process("child exited before it could be tracked".into())
        })?;

        let handle = ProcessHandle::new(id.clone(), pid, self.audit.clone());
        if let Ok(mut registry) = self.registry.lock() {
            registry.insert(id.clone(), handle.clone());
        }

        self.audit.record(
            "sandbox.process_start",
            Some(&id),
            json!({
                "command": cmd,
                "pid": pid,
                "cwd": current_dir.display().to_string(),
            }),
        );
        info!("started sandboxed process {} (pid {})", id, pid);

        spawn_monitor(handle.clone(), policy.clone(), self.audit.clone());

        Ok(SpawnedChild { child, handle })
    }

    /// Record a reaped child and drop it from the registry
    pub fn release(&self, handle: &ProcessHandle, exit_code: Option<i32>) {
        handle.mark_exited(exit_code);
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(handle.id());
        }

        let snapshot = handle.result_snapshot();
        self.audit.record(
            "sandbox.process_end",
            Some(handle.id()),
            json!({
                "exit_code": exit_code,
                "status": format!("{:?}", snapshot.status),
                "duration_ms": snapshot
                    .ended_at
                    .map(|e| (e - snapshot.started_at).num_milliseconds()),
            }),
        );
    }

    /// Number of processes still registered
    pub fn live_count(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Terminate every registered process; returns how many were signalled
    ///
    /// Used by the global shutdown path after the batch has been cancelled.
    pub async fn terminate_all(&self, grace: Duration) -> usize {
        let handles: Vec<ProcessHandle> = match self.registry.lock() {
            Ok(registry) => registry.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        let count = handles.len();
        for handle in handles {
            handle.terminate(grace).await;
        }
        count
    }
}

/// Configure setrlimit caps inside the pre-exec hook
#[cfg(unix)]
fn apply_resource_limits(command: &mut Command, policy: &SandboxPolicy) {
    let memory = policy.memory_limit;
    let file_size = policy.file_size_limit;
    let processes = policy.process_count_limit;

    // Safety: only async-signal-safe calls (setrlimit) run in the forked
    // child before exec.
    unsafe {
        command.pre_exec(move || {
            if let Some(bytes) = memory {
                set_rlimit(libc::RLIMIT_AS, bytes);
            }
            if let Some(bytes) = file_size {
                set_rlimit(libc::RLIMIT_FSIZE, bytes);
            }
            if let Some(count) = processes {
                set_rlimit(libc::RLIMIT_NPROC, count as u64);
            }
            Ok(())
        });
    }
}

#[cfg(all(unix, target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type RlimitResource = libc::c_int;

#[cfg(unix)]
fn set_rlimit(resource: RlimitResource, value: u64) {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    unsafe {
        libc::setrlimit(resource, &limit);
    }
}

/// Poll resource usage once a second until the process ends
///
/// Breaches are audited; with `terminate_on_violation` the process is
/// stopped with the default grace.
fn spawn_monitor(handle: ProcessHandle, policy: SandboxPolicy, audit: AuditLog) {
    tokio::spawn(async move {
        let mut sys = System::new();
        let pid = Pid::from_u32(handle.pid());
        let interval = Duration::from_millis(MONITOR_INTERVAL_MS);

        debug!("monitor started for {}", handle.id());
        loop {
            tokio::time::sleep(interval).await;
            if handle.status().is_terminal() {
                break;
            }

            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));
            let Some(process) = sys.process(pid) else {
                // Process is gone; the owner's wait() does the bookkeeping
                break;
            };

            let usage = ResourceUsage {
                cpu_percent: process.cpu_usage(),
                memory_bytes: process.memory(),
            };
            handle.set_usage(usage);

            let mut violation: Option<(&str, String)> = None;
            if let Some(limit) = policy.cpu_limit {
                if usage.cpu_percent > limit {
                    violation = Some((
                        "cpu",
                        format!(
                            "cpu usage {:.1}% over limit {:.1}%",
                            usage.cpu_percent, limit
                        ),
                    ));
                }
            }
            if let Some(limit) = policy.memory_limit {
                if usage.memory_bytes > limit {
                    violation = Some((
                        "memory",
                        format!(
                            "memory {} over limit {}",
                            format_bytes(usage.memory_bytes),
                            format_bytes(limit)
                        ),
                    ));
                }
            }

            if let Some((resource, detail)) = violation {
                warn!("process {} exceeded {} limit: {}", handle.id(), resource, detail);
                audit.record(
                    "sandbox.resource_violation",
                    Some(handle.id()),
                    json!({
                        "resource": resource,
                        "detail": detail.as_str(),
                        "action": if policy.terminate_on_violation {
                            "terminating"
                        } else {
                            "warning"
                        },
                    }),
                );
                if policy.terminate_on_violation {
                    handle.set_violation(detail);
                    handle
                        .terminate(Duration::from_secs(TERMINATE_GRACE_SECONDS))
                        .await;
                    break;
                }
            }
        }
        debug!("monitor stopped for {}", handle.id());
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_with_acl() -> SandboxPolicy {
        let mut policy = SandboxPolicy::default();
        policy.allow_read_path("/media/in");
        policy.allow_write_path("/media/out");
        policy.deny_path("/media/in/secret");
        policy
    }

    #[test]
    fn test_deny_overrides_allow() {
        let policy = policy_with_acl();
        assert!(policy.is_path_allowed_read(Path::new("/media/in/a.mp4")));
        assert!(!policy.is_path_allowed_read(Path::new("/media/in/secret/a.mp4")));
        assert!(policy.is_path_allowed_write(Path::new("/media/out/a")));
        assert!(!policy.is_path_allowed_write(Path::new("/media/in/a.mp4")));
    }

    #[test]
    fn test_empty_allow_set_permits_non_denied() {
        let mut policy = SandboxPolicy::default();
        policy.deny_path("/etc");
        assert!(policy.is_path_allowed_read(Path::new("/anywhere/else")));
        assert!(!policy.is_path_allowed_read(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_command_whitelist() {
        let mut policy = SandboxPolicy::default();
        policy.allow_command("ffmpeg");
        assert!(policy.is_command_allowed(Path::new("/usr/bin/ffmpeg")));
        assert!(!policy.is_command_allowed(Path::new("/usr/bin/curl")));
    }

    #[test]
    fn test_command_blacklist_beats_whitelist() {
        let mut policy = SandboxPolicy::default();
        policy.allow_command("/usr/bin/ffmpeg");
        policy.deny_command("/usr/bin/ffmpeg");
        assert!(!policy.is_command_allowed(Path::new("/usr/bin/ffmpeg")));
    }

    #[test]
    fn test_command_patterns() {
        let mut policy = SandboxPolicy::default();
        policy.allow_command_pattern(r"/usr/bin/ff.*").unwrap();
        assert!(policy.is_command_allowed(Path::new("/usr/bin/ffprobe")));
        assert!(!policy.is_command_allowed(Path::new("/usr/bin/bash")));

        policy.deny_command_pattern(r".*probe$").unwrap();
        assert!(!policy.is_command_allowed(Path::new("/usr/bin/ffprobe")));
    }

    #[test]
    fn test_shell_metacharacters_detected() {
        assert!(has_shell_metacharacters("a;b"));
        assert!(has_shell_metacharacters("$(cmd)"));
        assert!(has_shell_metacharacters("a|b"));
        assert!(has_shell_metacharacters("out>file"));
        assert!(!has_shell_metacharacters("-hls_time"));
        assert!(!has_shell_metacharacters("/media/in/123-456.mp4"));
    }

    #[test]
    fn test_absolutize_resolves_parent_components() {
        let cwd = Path::new("/media/work");
        assert_eq!(
            absolutize(Path::new("../other/file"), cwd),
            PathBuf::from("/media/other/file")
        );
        assert_eq!(absolutize(Path::new(".."), cwd), PathBuf::from("/media"));
        assert_eq!(
            absolutize(Path::new("/abs/./x/../y"), cwd),
            PathBuf::from("/abs/y")
        );
    }

    #[tokio::test]
    async fn test_validate_rejects_metacharacter_arg() {
        let audit = AuditLog::new(None);
        let sandbox = ProcessSandbox::new(audit);
        let mut policy = SandboxPolicy::default();
        policy.allow_command("sh");

        let cmd = vec!["sh".to_string(), "-c".to_string(), "echo hi; rm -rf /".to_string()];
        let result = sandbox.validate(&cmd, &policy, Path::new("/"));
        assert!(matches!(result, Err(CoreError::PolicyDenied(_))));
    }

    #[tokio::test]
    async fn test_validate_rejects_parent_dir_escape() {
        let audit = AuditLog::new(None);
        let sandbox = ProcessSandbox::new(audit);
        let mut policy = SandboxPolicy::default();
        policy.allow_command_pattern(".*").unwrap();
        policy.allow_read_path("/media/in");
        policy.allow_write_path("/media/out");

        #[cfg(unix)]
        {
            let cmd = vec!["/bin/sh".to_string(), "..".to_string()];
            let result = sandbox.validate(&cmd, &policy, Path::new("/media/in"));
            assert!(matches!(result, Err(CoreError::PolicyDenied(_))));
        }
    }

    #[tokio::test]
    async fn test_validate_missing_binary() {
        let audit = AuditLog::new(None);
        let sandbox = ProcessSandbox::new(audit);
        let policy = SandboxPolicy::default();

        let cmd = vec!["definitely-not-a-binary-xyz".to_string()];
        let result = sandbox.validate(&cmd, &policy, Path::new("/"));
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_wait_and_release() {
        let audit = AuditLog::new(None);
        let sandbox = ProcessSandbox::new(audit);
        let mut policy = SandboxPolicy::default();
        policy.allow_command("true");
        policy.validate_args = false;

        let cmd = vec!["true".to_string()];
        let spawned = sandbox.spawn(&cmd, &policy, None).unwrap();
        assert_eq!(sandbox.live_count(), 1);

        let mut child = spawned.child;
        let status = child.wait().await.unwrap();
        sandbox.release(&spawned.handle, status.code());

        assert_eq!(sandbox.live_count(), 0);
        assert!(spawned.handle.status().is_terminal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_monitor_escalates_on_memory_violation() {
        let audit = AuditLog::new(None);
        let sandbox = ProcessSandbox::new(audit);
        let mut policy = SandboxPolicy::default();
        policy.allow_command("sleep");
        // Any resident process blows a one-byte ceiling on the first poll
        policy.memory_limit = Some(1);
        policy.terminate_on_violation = true;

        let cmd = vec!["sleep".to_string(), "30".to_string()];
        let spawned = sandbox.spawn(&cmd, &policy, None).unwrap();
        let handle = spawned.handle.clone();
        let mut child = spawned.child;

        let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
            .await
            .expect("monitor should have terminated the child")
            .unwrap();

        assert!(!status.success());
        let violation = handle.violation().expect("violation reason recorded");
        assert!(violation.contains("memory"));
        sandbox.release(&handle, status.code());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_sleeping_child() {
        let audit = AuditLog::new(None);
        let sandbox = ProcessSandbox::new(audit);
        let mut policy = SandboxPolicy::default();
        policy.allow_command("sleep");

        let cmd = vec!["sleep".to_string(), "30".to_string()];
        let spawned = sandbox.spawn(&cmd, &policy, None).unwrap();

        let handle = spawned.handle.clone();
        let mut child = spawned.child;
        let waiter = tokio::spawn(async move { child.wait().await });

        handle.terminate(Duration::from_secs(2)).await;
        let status = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("child should die within grace")
            .unwrap()
            .unwrap();
        assert!(!status.success());
        sandbox.release(&handle, status.code());
    }
}
