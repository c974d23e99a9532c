//! Command-line options and their resolution into a validated [`Invocation`].
//!
//! clap rejects unknown flags and out-of-range values on its own. What it
//! cannot express are the cross-flag rules (a level needs a mitigation, the
//! coverage kernel has no level, container builds take no kernel options,
//! ...). Those are checked in one place, [`Invocation::resolve`], which
//! reports every violated rule at once and runs before anything touches the
//! filesystem or spawns a process.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

use crate::common_opts::VmOpts;
use crate::utils::parse_memory_to_mb;

/// Benchmark payload baked into a container image.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    ValueEnum,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Suite {
    /// Plain ubuntu container without any payload
    #[default]
    Ubuntu,
    /// NAS parallel benchmarks
    Nas,
    /// Phoronix test suite
    Phoronix,
    /// SPEC CPU 2006
    Spec,
}

impl Suite {
    /// Environment flag set inside the suite container, e.g. `NAS=true`.
    pub(crate) fn env_flag(self) -> String {
        format!("{}=true", self.to_string().to_uppercase())
    }
}

/// Kernel instrumentation selected at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Mitigation {
    /// Clang control-flow integrity
    Cfi,
    /// Stack protector
    Stackguard,
    /// Coverage instrumentation used for profiling (takes no --level)
    Gcov,
}

/// How broadly a mitigation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    /// Only the functions selected by profiling
    Selective,
    /// The whole kernel
    Full,
}

/// Options for `tracks build`
#[derive(Debug, Parser, Default)]
pub struct BuildOpts {
    /// Build the kernel image (baseline, or hardened with --mitigation and --level)
    #[clap(long, help_heading = "Build targets")]
    pub kernel: bool,

    /// Build a benchmark container (ubuntu unless --suite is given)
    #[clap(long, help_heading = "Build targets")]
    pub container: bool,

    /// Mitigation compiled into the kernel
    #[clap(long, value_enum, help_heading = "Kernel options")]
    pub mitigation: Option<Mitigation>,

    /// Level for --mitigation
    #[clap(long, value_enum, help_heading = "Kernel options")]
    pub level: Option<Level>,

    /// Payload to build into the container [default: ubuntu]
    #[clap(long, value_enum, help_heading = "Container options")]
    pub suite: Option<Suite>,
}

/// Options for `tracks benchmark`
#[derive(Debug, Parser, Default)]
pub struct BenchmarkOpts {
    /// Payload container started next to the benchmark script [default: ubuntu]
    #[clap(long, value_enum)]
    pub suite: Option<Suite>,

    /// Boot the kernel hardened with this mitigation
    #[clap(long, value_enum)]
    pub mitigation: Option<Mitigation>,

    /// Level for --mitigation
    #[clap(long, value_enum)]
    pub level: Option<Level>,

    #[clap(flatten)]
    pub vm: VmOpts,
}

/// Options for `tracks profile`
#[derive(Debug, Parser, Default)]
pub struct ProfileOpts {
    /// Payload run under the coverage kernel [default: ubuntu]
    #[clap(long, value_enum)]
    pub suite: Option<Suite>,

    #[clap(flatten)]
    pub vm: VmOpts,
}

/// Top-level verbs
#[derive(Debug, Subcommand)]
pub enum Action {
    /// Build a kernel or benchmark container image with docker
    Build(BuildOpts),

    /// Boot a (hardened) kernel in linuxkit and run benchmark.sh
    Benchmark(BenchmarkOpts),

    /// Boot the gcov kernel in linuxkit and run profile.sh
    Profile(ProfileOpts),
}

impl Action {
    /// The subcommand name as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Build(_) => "build",
            Action::Benchmark(_) => "benchmark",
            Action::Profile(_) => "profile",
        }
    }
}

/// A mitigation together with its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hardening {
    pub mitigation: Mitigation,
    pub level: Level,
}

/// Which kernel image is built or booted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFlavor {
    /// No instrumentation at all
    Baseline,
    /// gcov-instrumented kernel
    Coverage,
    Hardened(Hardening),
}

/// What `tracks build` produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildTarget {
    Kernel(KernelFlavor),
    Container(Suite),
}

/// The two commands that boot a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum VmAction {
    Benchmark,
    Profile,
}

impl VmAction {
    /// Control script shipped into the VM, e.g. `profile.sh`.
    pub(crate) fn script(self) -> String {
        format!("{self}.sh")
    }
}

/// Resolved hardware and file locations for a VM run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSettings {
    pub memory_mb: u32,
    pub cpus: u32,
    pub template: Utf8PathBuf,
    pub output: Utf8PathBuf,
    /// Name linuxkit gives the built image, the output file stem
    pub image_name: String,
}

/// A benchmark or profile run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRun {
    pub action: VmAction,
    pub suite: Suite,
    pub kernel: KernelFlavor,
    pub settings: VmSettings,
}

/// Fully validated configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Build(BuildTarget),
    Vm(VmRun),
}

/// A single broken rule between command-line flags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("build requires --kernel or --container")]
    MissingBuildTarget,
    #[error("--kernel and --container cannot be combined")]
    ConflictingBuildTargets,
    #[error("--suite only applies to --container builds")]
    SuiteWithKernel,
    #[error("{0} only applies to --kernel builds")]
    KernelOptionWithContainer(&'static str),
    #[error("--level not allowed without --mitigation")]
    LevelWithoutMitigation,
    #[error("--level not allowed with --mitigation=gcov")]
    LevelWithCoverage,
    #[error("--mitigation={0} requires --level")]
    MissingLevel(Mitigation),
    #[error("--mitigation=gcov is only valid for `build --kernel`")]
    CoverageOutsideKernelBuild,
    #[error("invalid --memory: {0}")]
    InvalidMemory(String),
    #[error("--cpus must be at least 1")]
    NoCpus,
    #[error("--output must name a file, got {0:?}")]
    InvalidOutput(Utf8PathBuf),
}

/// Every rule the command line broke.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_violations(.violations))]
pub struct UsageError {
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Invocation {
    /// Validate the parsed command line.
    pub fn resolve(action: &Action) -> Result<Self, UsageError> {
        let mut violations = Vec::new();
        let resolved = match action {
            Action::Build(opts) => opts.resolve(&mut violations).map(Invocation::Build),
            Action::Benchmark(opts) => opts.resolve(&mut violations).map(Invocation::Vm),
            Action::Profile(opts) => opts.resolve(&mut violations).map(Invocation::Vm),
        };
        match resolved {
            Some(invocation) if violations.is_empty() => Ok(invocation),
            _ => Err(UsageError { violations }),
        }
    }
}

/// Check the mitigation/level pair. `None` means at least one violation was recorded.
fn resolve_kernel_flavor(
    mitigation: Option<Mitigation>,
    level: Option<Level>,
    allow_coverage: bool,
    violations: &mut Vec<Violation>,
) -> Option<KernelFlavor> {
    match (mitigation, level) {
        (None, None) => Some(KernelFlavor::Baseline),
        (None, Some(_)) => {
            violations.push(Violation::LevelWithoutMitigation);
            None
        }
        (Some(Mitigation::Gcov), level) => {
            let mut ok = true;
            if !allow_coverage {
                violations.push(Violation::CoverageOutsideKernelBuild);
                ok = false;
            }
            if level.is_some() {
                violations.push(Violation::LevelWithCoverage);
                ok = false;
            }
            ok.then_some(KernelFlavor::Coverage)
        }
        (Some(mitigation), Some(level)) => {
            Some(KernelFlavor::Hardened(Hardening { mitigation, level }))
        }
        (Some(mitigation), None) => {
            violations.push(Violation::MissingLevel(mitigation));
            None
        }
    }
}

impl BuildOpts {
    fn resolve(&self, violations: &mut Vec<Violation>) -> Option<BuildTarget> {
        match (self.kernel, self.container) {
            (true, false) => {
                if self.suite.is_some() {
                    violations.push(Violation::SuiteWithKernel);
                }
                resolve_kernel_flavor(self.mitigation, self.level, true, violations)
                    .map(BuildTarget::Kernel)
            }
            (false, true) => {
                if self.mitigation.is_some() {
                    violations.push(Violation::KernelOptionWithContainer("--mitigation"));
                }
                if self.level.is_some() {
                    violations.push(Violation::KernelOptionWithContainer("--level"));
                }
                Some(BuildTarget::Container(self.suite.unwrap_or_default()))
            }
            (kernel, _) => {
                violations.push(if kernel {
                    Violation::ConflictingBuildTargets
                } else {
                    Violation::MissingBuildTarget
                });
                // Still report mitigation/level problems alongside the target error
                let _ = resolve_kernel_flavor(self.mitigation, self.level, true, violations);
                None
            }
        }
    }
}

impl BenchmarkOpts {
    fn resolve(&self, violations: &mut Vec<Violation>) -> Option<VmRun> {
        let kernel = resolve_kernel_flavor(self.mitigation, self.level, false, violations);
        let settings = resolve_vm_settings(&self.vm, violations);
        Some(VmRun {
            action: VmAction::Benchmark,
            suite: self.suite.unwrap_or_default(),
            kernel: kernel?,
            settings: settings?,
        })
    }
}

impl ProfileOpts {
    fn resolve(&self, violations: &mut Vec<Violation>) -> Option<VmRun> {
        let settings = resolve_vm_settings(&self.vm, violations)?;
        Some(VmRun {
            action: VmAction::Profile,
            suite: self.suite.unwrap_or_default(),
            kernel: KernelFlavor::Coverage,
            settings,
        })
    }
}

fn resolve_vm_settings(opts: &VmOpts, violations: &mut Vec<Violation>) -> Option<VmSettings> {
    let memory_mb = match parse_memory_to_mb(&opts.memory.memory) {
        Ok(mb) => Some(mb),
        Err(e) => {
            violations.push(Violation::InvalidMemory(format!("{e}")));
            None
        }
    };
    let cpus = if opts.cpus == 0 {
        violations.push(Violation::NoCpus);
        None
    } else {
        Some(opts.cpus)
    };
    let image_name = match opts.output.file_stem() {
        Some(stem) if !stem.is_empty() => Some(stem.to_owned()),
        _ => {
            violations.push(Violation::InvalidOutput(opts.output.clone()));
            None
        }
    };
    Some(VmSettings {
        memory_mb: memory_mb?,
        cpus: cpus?,
        template: opts.template.clone(),
        output: opts.output.clone(),
        image_name: image_name?,
    })
}
