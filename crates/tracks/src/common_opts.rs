//! Common CLI options shared by the commands that boot a VM

use camino::Utf8PathBuf;
use clap::Parser;

pub const DEFAULT_MEMORY_USER_STR: &str = "32G";
pub const DEFAULT_CPUS: u32 = 8;
pub const DEFAULT_TEMPLATE: &str = "linuxkit.yml.template";
pub const DEFAULT_OUTPUT: &str = "linuxkit.yml";

/// Memory size options
#[derive(Parser, Debug, Clone)]
pub struct MemoryOpts {
    #[clap(
        long,
        default_value = DEFAULT_MEMORY_USER_STR,
        help = "VM memory size (e.g. 32G, 2048M, or plain number for MB)"
    )]
    pub memory: String,
}

impl Default for MemoryOpts {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY_USER_STR.to_owned(),
        }
    }
}

/// Template locations and hardware for the linuxkit VM.
#[derive(Parser, Debug, Clone)]
pub struct VmOpts {
    #[clap(flatten)]
    pub memory: MemoryOpts,

    /// Number of vCPUs given to the VM
    #[clap(long, default_value_t = DEFAULT_CPUS)]
    pub cpus: u32,

    /// Base linuxkit template to patch
    #[clap(long, default_value = DEFAULT_TEMPLATE)]
    pub template: Utf8PathBuf,

    /// Where the patched linuxkit config is written (overwritten on every run)
    #[clap(long, default_value = DEFAULT_OUTPUT)]
    pub output: Utf8PathBuf,
}

impl Default for VmOpts {
    fn default() -> Self {
        Self {
            memory: MemoryOpts::default(),
            cpus: DEFAULT_CPUS,
            template: DEFAULT_TEMPLATE.into(),
            output: DEFAULT_OUTPUT.into(),
        }
    }
}
