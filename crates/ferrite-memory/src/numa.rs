//! NUMA topology detection.
//!
//! NUMA (Non-Uniform Memory Access) systems have memory attached to
//! different CPU sockets; accessing local memory is faster than remote
//! memory. The engine allocates one page pool per node and prefers local
//! allocation, degrading gracefully to standard allocation on systems
//! without NUMA.
//!
//! # Platform Support
//!
//! - **Linux**: topology read from sysfs
//! - **macOS/Windows**: reported as unavailable, single node

/// Returns whether NUMA is available on this system.
#[must_use]
pub fn numa_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/sys/devices/system/node").exists()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Returns the number of NUMA nodes on the system.
///
/// Always at least 1.
#[must_use]
pub fn numa_node_count() -> usize {
    #[cfg(target_os = "linux")]
    {
        if numa_available() {
            std::fs::read_dir("/sys/devices/system/node")
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .filter(|e| {
                            let name = e.file_name();
                            let name = name.to_string_lossy();
                            name.starts_with("node")
                                && name[4..].chars().all(|c| c.is_ascii_digit())
                        })
                        .count()
                        .max(1)
                })
                .unwrap_or(1)
        } else {
            1
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numa_available_does_not_panic() {
        let _ = numa_available();
    }

    #[test]
    fn test_node_count_at_least_one() {
        assert!(numa_node_count() >= 1);
    }
}
