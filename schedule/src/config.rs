//! Schedule configuration types.
//!
//! Typed configuration with bon builders and environment variable fallbacks.

use bon::bon;
use tessel_ir::DType;

// ============================================================================
// HARDWARE PARAMETERS
// ============================================================================

/// Description of the target the schedule is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareParams {
    /// Number of cores available for parallel loops.
    pub num_cores: usize,
    /// Width of the vector unit in bytes.
    pub vector_unit_bytes: usize,
    /// Shared memory available to one thread block (0 on CPU).
    pub max_shared_memory_per_block: usize,
    /// Threads per block (1 on CPU).
    pub max_threads_per_block: usize,
}

fn default_num_cores() -> usize {
    std::thread::available_parallelism().map(|p| p.get()).unwrap_or(8)
}

impl HardwareParams {
    /// Host CPU with AVX2-sized vectors.
    pub fn cpu() -> Self {
        Self {
            num_cores: default_num_cores(),
            vector_unit_bytes: 32,
            max_shared_memory_per_block: 0,
            max_threads_per_block: 1,
        }
    }

    /// NVIDIA GPU with tensor cores (sm_70 and newer).
    pub fn cuda() -> Self {
        Self {
            num_cores: 80,
            vector_unit_bytes: 16,
            max_shared_memory_per_block: 48 * 1024,
            max_threads_per_block: 1024,
        }
    }

    /// Whether the target runs thread blocks with shared memory.
    pub fn is_gpu(&self) -> bool {
        self.max_shared_memory_per_block > 0
    }

    /// CPU parameters with environment overrides.
    ///
    /// # Environment Variables
    ///
    /// * `TESSEL_NUM_CORES` - Number of cores (default: available_parallelism)
    /// * `TESSEL_VECTOR_BYTES` - Vector unit width in bytes (default: 32)
    pub fn from_env() -> Self {
        let cpu = Self::cpu();
        let num_cores = std::env::var("TESSEL_NUM_CORES").ok().and_then(|s| s.parse().ok()).unwrap_or(cpu.num_cores);
        let vector_unit_bytes =
            std::env::var("TESSEL_VECTOR_BYTES").ok().and_then(|s| s.parse().ok()).unwrap_or(cpu.vector_unit_bytes);

        Self { num_cores, vector_unit_bytes, ..cpu }
    }
}

impl Default for HardwareParams {
    fn default() -> Self {
        Self::cpu()
    }
}

#[bon]
impl HardwareParams {
    #[builder]
    pub fn builder(
        #[builder(default = default_num_cores())] num_cores: usize,
        #[builder(default = 32)] vector_unit_bytes: usize,
        #[builder(default = 0)] max_shared_memory_per_block: usize,
        #[builder(default = 1)] max_threads_per_block: usize,
    ) -> Self {
        Self { num_cores, vector_unit_bytes, max_shared_memory_per_block, max_threads_per_block }
    }
}

// ============================================================================
// SCHEDULE LIMITS
// ============================================================================

/// Limits every primitive applied to a [`crate::State`] is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleLimits {
    /// Vector register width in bytes. `None` disables the vectorize extent check.
    pub vector_unit_bytes: Option<usize>,
    /// Threads one block may hold. `None` disables the thread binding check.
    pub max_threads_per_block: Option<usize>,
    /// Byte alignment given to every stage buffer.
    pub default_data_alignment: usize,
}

impl Default for ScheduleLimits {
    fn default() -> Self {
        Self { vector_unit_bytes: None, max_threads_per_block: None, default_data_alignment: 64 }
    }
}

fn env_data_alignment() -> usize {
    std::env::var("TESSEL_DATA_ALIGNMENT").ok().and_then(|s| s.parse().ok()).unwrap_or(64)
}

impl ScheduleLimits {
    /// Limits of `hw`. Thread bindings are only bounded on GPU targets.
    ///
    /// # Environment Variables
    ///
    /// * `TESSEL_DATA_ALIGNMENT` - Buffer alignment in bytes (default: 64)
    pub fn from_hardware(hw: &HardwareParams) -> Self {
        Self {
            vector_unit_bytes: Some(hw.vector_unit_bytes),
            max_threads_per_block: hw.is_gpu().then_some(hw.max_threads_per_block),
            default_data_alignment: env_data_alignment(),
        }
    }

    /// # Environment Variables
    ///
    /// * `TESSEL_VECTOR_BYTES` - Vector register width in bytes (default: unlimited)
    /// * `TESSEL_MAX_THREADS` - Threads per block (default: unlimited)
    /// * `TESSEL_DATA_ALIGNMENT` - Buffer alignment in bytes (default: 64)
    pub fn from_env() -> Self {
        let vector_unit_bytes = std::env::var("TESSEL_VECTOR_BYTES").ok().and_then(|s| s.parse().ok());
        let max_threads_per_block = std::env::var("TESSEL_MAX_THREADS").ok().and_then(|s| s.parse().ok());

        Self { vector_unit_bytes, max_threads_per_block, default_data_alignment: env_data_alignment() }
    }

    /// Vector lanes available for elements of `dtype`.
    pub fn max_vector_lanes(&self, dtype: DType) -> Option<i64> {
        self.vector_unit_bytes.map(|bytes| (bytes / dtype.bytes()).max(1) as i64)
    }
}

#[bon]
impl ScheduleLimits {
    #[builder]
    pub fn builder(
        vector_unit_bytes: Option<usize>,
        max_threads_per_block: Option<usize>,
        #[builder(default = 64)] default_data_alignment: usize,
    ) -> Self {
        Self { vector_unit_bytes, max_threads_per_block, default_data_alignment }
    }
}

// ============================================================================
// SKETCH GENERATION
// ============================================================================

/// Multi-level tiling structure for CPU targets.
pub const CPU_TILING_STRUCTURE: &str = "SSRSRS";
/// Multi-level tiling structure for GPU targets.
pub const GPU_TILING_STRUCTURE: &str = "SSSRRSRS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SketchParams {
    /// Tiling levels, outermost first: `S` for a spatial level, `R` for a
    /// reduction level.
    pub tiling_structure: String,
    /// Upper bound on the number of in-flight and finished sketches.
    pub max_sketches: usize,
    /// Whether the built-in rules are registered after the custom ones.
    pub builtin_rules: bool,
}

impl SketchParams {
    pub fn cpu() -> Self {
        Self { tiling_structure: CPU_TILING_STRUCTURE.to_string(), max_sketches: 64, builtin_rules: true }
    }

    pub fn gpu() -> Self {
        Self { tiling_structure: GPU_TILING_STRUCTURE.to_string(), ..Self::cpu() }
    }

    /// # Environment Variables
    ///
    /// * `TESSEL_TILING_STRUCTURE` - Multi-level tiling structure (default: `SSRSRS`)
    /// * `TESSEL_MAX_SKETCHES` - Sketch cap (default: 64)
    pub fn from_env() -> Self {
        let cpu = Self::cpu();
        let tiling_structure = std::env::var("TESSEL_TILING_STRUCTURE").unwrap_or(cpu.tiling_structure);
        let max_sketches =
            std::env::var("TESSEL_MAX_SKETCHES").ok().and_then(|s| s.parse().ok()).unwrap_or(cpu.max_sketches);

        Self { tiling_structure, max_sketches, builtin_rules: true }
    }

    /// Number of spatial levels in the tiling structure.
    pub fn spatial_levels(&self) -> usize {
        self.tiling_structure.chars().filter(|c| c.eq_ignore_ascii_case(&'s')).count()
    }

    /// Number of reduction levels in the tiling structure.
    pub fn reduce_levels(&self) -> usize {
        self.tiling_structure.chars().filter(|c| c.eq_ignore_ascii_case(&'r')).count()
    }
}

impl Default for SketchParams {
    fn default() -> Self {
        Self::cpu()
    }
}

#[bon]
impl SketchParams {
    #[builder]
    pub fn builder(
        #[builder(into, default = CPU_TILING_STRUCTURE.to_string())] tiling_structure: String,
        #[builder(default = 64)] max_sketches: usize,
        #[builder(default = true)] builtin_rules: bool,
    ) -> Self {
        Self { tiling_structure, max_sketches, builtin_rules }
    }
}
