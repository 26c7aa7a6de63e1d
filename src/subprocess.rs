//! Subprocess lifecycle tracking: the batched SIGTERM / sleep / SIGKILL dance.
//!
//! Deliberately separate from [`crate::cleanup`]: running each subprocess's
//! termination through the generic cleanup mechanism would mean one grace
//! sleep per subprocess. A pool that notes ten children would then block its
//! clear for thirty seconds instead of three. Batching the wait once across
//! every subprocess registered on the pool is the entire reason this is its
//! own registry.

use std::thread;
use std::time::Duration;

use crate::error::{PoolError, PoolResult};

/// When a tracked subprocess should be signaled as its pool clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillPolicy {
    /// Leave it running; it outlives the pool.
    Never,
    /// SIGKILL immediately, no grace period.
    Always,
    /// SIGTERM first; SIGKILL it if still alive after the batched grace wait.
    AfterTimeout,
    /// SIGTERM once; never escalated even if it survives the grace wait.
    OnlyOnce,
}

struct Tracked {
    pid: i32,
    policy: KillPolicy,
}

#[derive(Default)]
pub(crate) struct SubprocessRegistry {
    procs: Vec<Tracked>,
}

impl SubprocessRegistry {
    pub(crate) fn new() -> Self {
        Self { procs: Vec::new() }
    }

    pub(crate) fn note(&mut self, pid: i32, policy: KillPolicy) {
        self.procs.push(Tracked { pid, policy });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Runs the full protocol described in the design notes and drains the
    /// registry. Failures to signal or reap an individual process are logged
    /// and do not abort the batch — teardown must finish regardless.
    pub(crate) fn reap_all(&mut self, grace: Duration) {
        if self.procs.is_empty() {
            return;
        }
        #[cfg(feature = "logging")]
        tracing::debug!(count = self.procs.len(), "reaping tracked subprocesses on pool clear");

        // Pass 0: reclassify already-exited processes so they're skipped below.
        for p in &mut self.procs {
            if p.policy != KillPolicy::Never && try_reap_nonblocking(p.pid) {
                p.policy = KillPolicy::Never;
            }
        }

        // Pass 1: signal.
        let mut need_timeout = false;
        for p in &self.procs {
            match p.policy {
                KillPolicy::AfterTimeout | KillPolicy::OnlyOnce => match send_signal(p.pid, libc::SIGTERM) {
                    Ok(()) => need_timeout = true,
                    Err(_err) => {
                        #[cfg(feature = "logging")]
                        tracing::warn!(pid = p.pid, error = %_err, "failed to deliver SIGTERM");
                    }
                },
                KillPolicy::Always => {
                    if let Err(_err) = send_signal(p.pid, libc::SIGKILL) {
                        #[cfg(feature = "logging")]
                        tracing::warn!(pid = p.pid, error = %_err, "failed to deliver SIGKILL");
                    }
                }
                KillPolicy::Never => {}
            }
        }

        // Batched grace wait: once, not once per process.
        if need_timeout {
            thread::sleep(grace);
        }

        // Pass 2: escalate only `AfterTimeout` survivors.
        for p in &self.procs {
            if p.policy == KillPolicy::AfterTimeout && !try_reap_nonblocking(p.pid) {
                #[cfg(feature = "logging")]
                tracing::warn!(pid = p.pid, "subprocess outlived grace interval, escalating to SIGKILL");
                let _ = send_signal(p.pid, libc::SIGKILL);
            }
        }

        // Final wait: block until every non-Never process is reaped.
        for p in &self.procs {
            if p.policy != KillPolicy::Never {
                reap_blocking(p.pid);
            }
        }

        self.procs.clear();
    }
}

fn send_signal(pid: i32, signal: i32) -> PoolResult<()> {
    // SAFETY: pid is a plain process id; kill() has no memory-safety
    // preconditions beyond that.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(PoolError::Subprocess { pid, source: std::io::Error::last_os_error() })
    }
}

/// Non-blocking reap attempt. Returns true if the process had already exited.
fn try_reap_nonblocking(pid: i32) -> bool {
    let mut status = 0i32;
    // SAFETY: status is a valid out-pointer for waitpid.
    let rc = unsafe { libc::waitpid(pid, &mut status as *mut i32, libc::WNOHANG) };
    rc == pid
}

fn reap_blocking(pid: i32) {
    let mut status = 0i32;
    loop {
        // SAFETY: status is a valid out-pointer for waitpid.
        let rc = unsafe { libc::waitpid(pid, &mut status as *mut i32, 0) };
        if rc == pid || rc < 0 {
            break;
        }
    }
}
