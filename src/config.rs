use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::io::disk::{DISK_SIZE, VIRTUAL_MEMORY_SIZE};
use crate::kernel::memory::buddy::{DEFAULT_MAX_ORDER, DEFAULT_MIN_ORDER};
use crate::kernel::memory::{BuddyAllocator, FixedPartitionAllocator, MemoryAllocator};
use crate::kernel::short_term_scheduler::SchedulingAlgorithm;

pub const MAX_CPUS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub cpus: Vec<CpuConfig>,
    pub memory: MemoryConfig,
    pub disk: DiskConfig,
    /// Pause between ticks when free-running.
    pub step_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub scheduler: SchedulingAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub user_size: usize,
    pub allocator: AllocatorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocatorConfig {
    FixedEqual { partition_size: usize },
    FixedUnequal,
    Buddy { min_order: u32, max_order: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub size: usize,
    pub virtual_memory: usize,
}

impl AllocatorConfig {
    pub fn build(&self) -> Box<dyn MemoryAllocator> {
        match *self {
            AllocatorConfig::FixedEqual { partition_size } => {
                Box::new(FixedPartitionAllocator::equal(partition_size))
            }
            AllocatorConfig::FixedUnequal => Box::new(FixedPartitionAllocator::unequal()),
            AllocatorConfig::Buddy { min_order, max_order } => {
                Box::new(BuddyAllocator::new(min_order, max_order))
            }
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> AllocatorConfig {
        AllocatorConfig::Buddy {
            min_order: DEFAULT_MIN_ORDER,
            max_order: DEFAULT_MAX_ORDER,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> MemoryConfig {
        MemoryConfig {
            user_size: 1024,
            allocator: AllocatorConfig::default(),
        }
    }
}

impl Default for DiskConfig {
    fn default() -> DiskConfig {
        DiskConfig {
            size: DISK_SIZE,
            virtual_memory: VIRTUAL_MEMORY_SIZE,
        }
    }
}

impl Default for SystemConfig {
    fn default() -> SystemConfig {
        SystemConfig {
            cpus: vec![CpuConfig::default()],
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            step_interval_ms: 100,
        }
    }
}

impl SystemConfig {
    pub fn from_json(json: &str) -> Result<SystemConfig> {
        let config: SystemConfig =
            serde_json::from_str(json).map_err(|err| SimError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<SystemConfig> {
        let json = fs::read_to_string(path)
            .map_err(|err| SimError::Config(format!("cannot read {}: {}", path.display(), err)))?;
        SystemConfig::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| SimError::Config(err.to_string()))
    }

    /// Uses `algorithm` on every CPU, keeping the CPU count.
    pub fn set_scheduler(&mut self, algorithm: SchedulingAlgorithm) {
        for cpu in &mut self.cpus {
            cpu.scheduler = algorithm;
        }
    }

    /// Resizes the CPU list, copying the first CPU's scheduler to new ones.
    pub fn set_cpu_count(&mut self, count: usize) {
        let template = self.cpus.first().copied().unwrap_or_default();
        self.cpus.resize(count, template);
    }

    pub fn validate(&self) -> Result<()> {
        if self.cpus.is_empty() || self.cpus.len() > MAX_CPUS {
            return Err(SimError::Config(format!("between 1 and {} CPUs are supported", MAX_CPUS)));
        }

        for cpu in &self.cpus {
            if let SchedulingAlgorithm::RoundRobin { quantum: 0 } = cpu.scheduler {
                return Err(SimError::Config("round robin quantum must be at least 1".to_string()));
            }
        }

        if self.memory.user_size == 0 {
            return Err(SimError::Config("user memory size must be positive".to_string()));
        }

        match self.memory.allocator {
            AllocatorConfig::FixedEqual { partition_size } => {
                if partition_size == 0 || partition_size > self.memory.user_size {
                    return Err(SimError::Config(format!(
                        "invalid partition size: {}",
                        partition_size
                    )));
                }
            }
            AllocatorConfig::FixedUnequal => {
                if self.memory.user_size < 2 {
                    return Err(SimError::Config(
                        "user memory too small for unequal partitions".to_string(),
                    ));
                }
            }
            AllocatorConfig::Buddy { min_order, max_order } => {
                if min_order > max_order || max_order >= usize::BITS {
                    return Err(SimError::Config(format!(
                        "invalid buddy orders {}..={}",
                        min_order, max_order
                    )));
                }
                if self.memory.user_size < 1 << min_order {
                    return Err(SimError::Config(format!(
                        "user memory of {} is smaller than the minimum buddy block",
                        self.memory.user_size
                    )));
                }
            }
        }

        if self.disk.virtual_memory >= self.disk.size {
            return Err(SimError::Config(
                "virtual memory must leave room for programs on disk".to_string(),
            ));
        }

        Ok(())
    }
}
