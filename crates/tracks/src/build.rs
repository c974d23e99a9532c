//! `tracks build`: kernel and benchmark container images via `docker build`.
//!
//! Kernels come out of the `kernel-build` stage of `Dockerfile.kernel`,
//! always rebuilt from scratch; benchmark containers come out of the stage
//! named after the suite in `Dockerfile.benchmark`.

use color_eyre::Result;

use crate::command::ToolCommand;
use crate::images::Images;
use crate::invocation::{BuildTarget, KernelFlavor, Suite};
use crate::runner::{self, ProcessRunner, ToolStatus};

const KERNEL_STAGE: &str = "kernel-build";
const KERNEL_DOCKERFILE: &str = "Dockerfile.kernel";
const BENCHMARK_DOCKERFILE: &str = "Dockerfile.benchmark";
/// Hardened kernels are compiled with clang
const LLVM_COMPILER: &str = "LLVM=1";

fn docker_build() -> ToolCommand {
    ToolCommand::new("docker").arg("build")
}

fn build_arg(cmd: ToolCommand, key: &str, value: &str) -> ToolCommand {
    cmd.arg("--build-arg").arg(format!("{key}={value}"))
}

pub(crate) fn kernel_command(flavor: &KernelFlavor, images: &Images) -> ToolCommand {
    let mut cmd = docker_build().args(["--target", KERNEL_STAGE, "--no-cache"]);
    match flavor {
        KernelFlavor::Baseline => {}
        KernelFlavor::Coverage => {
            cmd = build_arg(cmd, "FEATURE", "-gcov");
        }
        KernelFlavor::Hardened(hardening) => {
            cmd = build_arg(cmd, "FEATURE", &format!("-{}", hardening.mitigation));
            cmd = build_arg(cmd, "LEVEL", &format!("-{}", hardening.level));
            cmd = build_arg(cmd, "COMPILER", LLVM_COMPILER);
        }
    }
    cmd.arg("-t")
        .arg(images.kernel_tag(flavor))
        .args(["-f", KERNEL_DOCKERFILE, "."])
}

pub(crate) fn container_command(suite: Suite, images: &Images) -> ToolCommand {
    docker_build()
        .arg("--target")
        .arg(suite.to_string())
        .arg("-t")
        .arg(images.suite_tag(suite))
        .args(["-f", BENCHMARK_DOCKERFILE, "."])
}

/// Build the requested image. Never touches the VM template.
pub(crate) fn run(
    target: &BuildTarget,
    images: &Images,
    runner: &mut dyn ProcessRunner,
) -> Result<ToolStatus> {
    let cmd = match target {
        BuildTarget::Kernel(flavor) => {
            tracing::debug!("Building kernel {}", images.kernel_tag(flavor));
            kernel_command(flavor, images)
        }
        BuildTarget::Container(suite) => {
            tracing::debug!("Building {suite} container");
            container_command(*suite, images)
        }
    };
    runner::execute(runner, &[cmd])
}
