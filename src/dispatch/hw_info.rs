//! Host CPU facts the planner consults: vector ISA features and core counts.

/// x86 feature flags relevant to kernel generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsaFeatures {
    pub avx2: bool,
    pub fma: bool,
    pub avx512f: bool,
    pub avx512vl: bool,
}

/// Physical/logical core counts. `cores_per_socket` is what the planner's
/// small-batch heuristics compare the thread count against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreCounts {
    pub physical: usize,
    pub logical: usize,
    pub per_socket: usize,
}

// ── ISA feature detection ───────────────────────────────────────────────

pub fn detect_isa_features() -> IsaFeatures {
    #[cfg(target_arch = "x86_64")]
    {
        return IsaFeatures {
            avx2: is_x86_feature_detected!("avx2"),
            fma: is_x86_feature_detected!("fma"),
            avx512f: is_x86_feature_detected!("avx512f"),
            avx512vl: is_x86_feature_detected!("avx512vl"),
        };
    }
    #[allow(unreachable_code)]
    IsaFeatures::default()
}

// ── Core count detection ────────────────────────────────────────────────

pub fn detect_core_counts() -> CoreCounts {
    let logical = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/cpuinfo") {
            if let Some((physical, per_socket)) = parse_linux_cpuinfo(&content) {
                return CoreCounts { physical, logical, per_socket };
            }
        }
    }

    // Fallback: assume no HT, single socket
    CoreCounts { physical: logical, logical, per_socket: logical }
}

/// Count distinct (socket, core) pairs and the largest per-socket core count.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_linux_cpuinfo(content: &str) -> Option<(usize, usize)> {
    let mut core_ids = std::collections::HashSet::new();
    let mut current_physical = None;
    for line in content.lines() {
        if line.starts_with("physical id") {
            current_physical = line.split(':').nth(1).and_then(|s| s.trim().parse::<usize>().ok());
        }
        if line.starts_with("core id") {
            if let (Some(phys), Some(core)) = (
                current_physical,
                line.split(':').nth(1).and_then(|s| s.trim().parse::<usize>().ok()),
            ) {
                core_ids.insert((phys, core));
            }
        }
    }
    if core_ids.is_empty() {
        return None;
    }
    let mut per_socket = std::collections::HashMap::new();
    for (phys, _) in &core_ids {
        *per_socket.entry(*phys).or_insert(0usize) += 1;
    }
    let max_per_socket = per_socket.values().copied().max().unwrap_or(core_ids.len());
    Some((core_ids.len(), max_per_socket))
}
