// limits.rs - Per-execution resource ceilings.
//
// Limits come from the manifest (`boundaries.resource_limits`, or the
// defaults when absent) and the host's default wall-clock timeout. They
// are applied per execution:
//
// - memory: the handler thread's heap is metered (see meter.rs) and
//   explicit reservations through the context are counted too; either
//   passing `max_memory_mb` ends the execution. Child processes get RLIMIT_AS.
// - storage: workspace writes are checked against `max_storage_mb`; child
//   processes get RLIMIT_FSIZE.
// - CPU: child processes get RLIMIT_CPU = wall clock × cpu% (at least 1s).
// - wall clock: the caller stops waiting on the handler thread and halts
//   its context once the timeout passes.

use std::time::Duration;

use pt_manifest::ResourceLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub memory_bytes: u64,
    pub storage_bytes: u64,
    pub cpu_percent: u8,
    pub wall_clock: Duration,
}

impl ExecutionLimits {
    pub fn new(limits: &ResourceLimits, default_timeout: Duration) -> Self {
        Self {
            memory_bytes: limits.max_memory_bytes(),
            storage_bytes: limits.max_storage_bytes(),
            cpu_percent: limits.max_cpu_percent,
            wall_clock: limits
                .max_execution_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        }
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / (1024 * 1024)
    }

    pub fn storage_mb(&self) -> u64 {
        self.storage_bytes / (1024 * 1024)
    }

    /// CPU seconds a child process may burn within one execution.
    pub fn cpu_seconds(&self) -> u64 {
        let budget = self.wall_clock.as_secs_f64() * f64::from(self.cpu_percent) / 100.0;
        (budget.ceil() as u64).max(1)
    }

    /// Install rlimits on a child process before it execs.
    #[cfg(unix)]
    pub(crate) fn apply_to(&self, command: &mut tokio::process::Command) {
        let ceilings = [
            (libc::RLIMIT_AS, self.memory_bytes),
            (libc::RLIMIT_CPU, self.cpu_seconds()),
            (libc::RLIMIT_FSIZE, self.storage_bytes),
        ];
        // SAFETY: the closure runs in the forked child before exec and only
        // calls setrlimit, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                for (resource, value) in ceilings {
                    let limit = libc::rlimit {
                        rlim_cur: value as libc::rlim_t,
                        rlim_max: value as libc::rlim_t,
                    };
                    if libc::setrlimit(resource, &limit) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
    }

    // TODO: apply job-object limits on Windows; only the wall-clock timeout
    // bounds child processes there today.
    #[cfg(not(unix))]
    pub(crate) fn apply_to(&self, _command: &mut tokio::process::Command) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_timeout_overrides_default() {
        let declared = ResourceLimits {
            max_execution_secs: Some(5),
            ..ResourceLimits::default()
        };
        let limits = ExecutionLimits::new(&declared, Duration::from_secs(30));
        assert_eq!(limits.wall_clock, Duration::from_secs(5));

        let limits = ExecutionLimits::new(&ResourceLimits::default(), Duration::from_secs(30));
        assert_eq!(limits.wall_clock, Duration::from_secs(30));
    }

    #[test]
    fn cpu_budget_is_a_share_of_wall_clock() {
        let limits = ExecutionLimits::new(&ResourceLimits::default(), Duration::from_secs(60));
        // 10% of 60s.
        assert_eq!(limits.cpu_seconds(), 6);

        let short = ExecutionLimits::new(&ResourceLimits::default(), Duration::from_millis(200));
        assert_eq!(short.cpu_seconds(), 1);
    }

    #[test]
    fn megabytes_round_trip() {
        let limits = ExecutionLimits::new(&ResourceLimits::default(), Duration::from_secs(1));
        assert_eq!(limits.memory_mb(), 256);
        assert_eq!(limits.storage_mb(), 100);
    }
}
