//! Host identity and process liveness.
//!
//! Liveness is only meaningful for the local host: a PID recorded by another
//! machine says nothing about processes here.

use once_cell::sync::Lazy;

static LOCAL_HOSTNAME: Lazy<String> =
    Lazy::new(|| sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()));

/// The hostname recorded in registry entries and lock records.
pub fn local_hostname() -> String {
    LOCAL_HOSTNAME.clone()
}

/// Zero-effect signal probe. Any delivery failure means "no such process".
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            // 0 and negatives address process groups, not a single process.
            return false;
        }
        // SAFETY: kill(pid, 0) performs permission and existence checks only.
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Parent process id, used when a short-lived CLI acts on behalf of its caller.
pub fn parent_pid() -> Option<u32> {
    #[cfg(unix)]
    {
        // SAFETY: getppid has no preconditions and cannot fail.
        let ppid = unsafe { libc::getppid() };
        u32::try_from(ppid).ok().filter(|p| *p > 1)
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Decides whether a PID on the local host still exists.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl LivenessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        is_pid_alive(pid)
    }
}
