//! Host device profile used by the blocking planner.
//!
//! Captures the vector ISA the generated code may target and the core
//! topology the thread-partition heuristics depend on.

use super::hw_info::{detect_core_counts, detect_isa_features, CoreCounts, IsaFeatures};

/// ISA level a kernel is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsaLevel {
    /// AVX2 + FMA: 16 ymm registers, vector-mask tail handling.
    Avx2,
    /// AVX-512F + VL: 32 zmm registers, opmask tail handling.
    Avx512,
}

impl IsaLevel {
    /// Number of architectural vector registers.
    #[inline]
    pub const fn vec_regs(self) -> usize {
        match self {
            IsaLevel::Avx2 => 16,
            IsaLevel::Avx512 => 32,
        }
    }

    /// 32-bit lanes in the widest vector register.
    #[inline]
    pub const fn lanes(self) -> usize {
        match self {
            IsaLevel::Avx2 => 8,
            IsaLevel::Avx512 => 16,
        }
    }

    #[inline]
    pub const fn has_opmask(self) -> bool {
        matches!(self, IsaLevel::Avx512)
    }
}

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Best ISA level usable for generated kernels, `None` off x86-64 or
    /// on hosts without AVX2+FMA.
    pub isa: Option<IsaLevel>,
    pub features: IsaFeatures,
    pub cores: CoreCounts,
}

impl DeviceProfile {
    /// Detect the current hardware.
    pub fn detect() -> Self {
        let features = detect_isa_features();
        let cores = detect_core_counts();
        DeviceProfile { isa: isa_from_features(features), features, cores }
    }

    /// Profile for an explicit ISA level, used for planning on behalf of a
    /// different host and in tests.
    pub fn with_isa(isa: IsaLevel, cores_per_socket: usize) -> Self {
        let per_socket = cores_per_socket.max(1);
        DeviceProfile {
            isa: Some(isa),
            features: IsaFeatures {
                avx2: true,
                fma: true,
                avx512f: isa == IsaLevel::Avx512,
                avx512vl: isa == IsaLevel::Avx512,
            },
            cores: CoreCounts { physical: per_socket, logical: per_socket, per_socket },
        }
    }

    /// Whether kernels generated for `isa` can run on this host.
    pub fn supports(&self, isa: IsaLevel) -> bool {
        match isa {
            IsaLevel::Avx2 => self.features.avx2 && self.features.fma,
            IsaLevel::Avx512 => self.supports(IsaLevel::Avx2) && self.features.avx512f && self.features.avx512vl,
        }
    }
}

fn isa_from_features(f: IsaFeatures) -> Option<IsaLevel> {
    if f.avx2 && f.fma && f.avx512f && f.avx512vl {
        Some(IsaLevel::Avx512)
    } else if f.avx2 && f.fma {
        Some(IsaLevel::Avx2)
    } else {
        None
    }
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} | {}P/{}L ({} per socket)",
            self.isa, self.cores.physical, self.cores.logical, self.cores.per_socket,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_profile() {
        let profile = DeviceProfile::detect();
        eprintln!("DeviceProfile: {profile}");
        assert!(profile.cores.logical >= 1);
        if let Some(isa) = profile.isa {
            assert!(profile.supports(isa));
        }
    }

    #[test]
    fn test_isa_geometry() {
        assert_eq!(IsaLevel::Avx512.vec_regs(), 32);
        assert_eq!(IsaLevel::Avx512.lanes(), 16);
        assert_eq!(IsaLevel::Avx2.vec_regs(), 16);
        assert_eq!(IsaLevel::Avx2.lanes(), 8);
    }

    #[test]
    fn test_isa_from_features() {
        let avx2 = IsaFeatures { avx2: true, fma: true, ..Default::default() };
        assert_eq!(isa_from_features(avx2), Some(IsaLevel::Avx2));
        let no_vl = IsaFeatures { avx512f: true, ..avx2 };
        assert_eq!(isa_from_features(no_vl), Some(IsaLevel::Avx2));
        let full = IsaFeatures { avx512vl: true, ..no_vl };
        assert_eq!(isa_from_features(full), Some(IsaLevel::Avx512));
        assert_eq!(isa_from_features(IsaFeatures::default()), None);
    }

    #[test]
    fn test_explicit_profile() {
        let p = DeviceProfile::with_isa(IsaLevel::Avx2, 0);
        assert_eq!(p.cores.per_socket, 1);
        assert!(p.supports(IsaLevel::Avx2));
        assert!(!p.supports(IsaLevel::Avx512));
    }
}
