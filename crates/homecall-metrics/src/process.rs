use tokio::runtime::Handle;

/// Live facts about the running process, read fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessStats {
    pub resident_memory_bytes: u64,
    pub active_tasks: u64,
}

impl ProcessStats {
    pub fn read() -> Self {
        let status = read_proc_status();
        let resident_memory_bytes = status
            .as_deref()
            .and_then(|status| status_field(status, "VmRSS:"))
            .and_then(|kb| kb.checked_mul(1024))
            .unwrap_or(0);

        // Inside a runtime, count its live tasks; otherwise fall back to OS threads.
        let active_tasks = match Handle::try_current() {
            Ok(handle) => handle.metrics().num_alive_tasks() as u64,
            Err(_) => status
                .as_deref()
                .and_then(|status| status_field(status, "Threads:"))
                .unwrap_or(0),
        };

        Self {
            resident_memory_bytes,
            active_tasks,
        }
    }
}

fn status_field(status: &str, key: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        line.strip_prefix(key)?
            .split_whitespace()
            .next()
            .and_then(|value| value.parse::<u64>().ok())
    })
}

#[cfg(target_os = "linux")]
fn read_proc_status() -> Option<String> {
    std::fs::read_to_string("/proc/self/status").ok()
}

#[cfg(not(target_os = "linux"))]
fn read_proc_status() -> Option<String> {
    None
}
