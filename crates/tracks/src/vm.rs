//! `tracks benchmark` and `tracks profile`: boot the kernel in a linuxkit VM.
//!
//! The base template is patched for the run and written out, then linuxkit
//! builds the VM image from it and boots it under qemu. The run step only
//! happens if the build step succeeded.

use camino::Utf8Path;
use color_eyre::Result;

use crate::command::ToolCommand;
use crate::images::Images;
use crate::invocation::VmRun;
use crate::runner::{self, ProcessRunner, ToolStatus};
use crate::template::{self, VmTemplate};

pub(crate) fn linuxkit_build_command(config: &Utf8Path) -> ToolCommand {
    ToolCommand::new("linuxkit")
        .args(["build", "-disable-content-trust"])
        .arg(config.as_str())
}

pub(crate) fn linuxkit_run_command(image_name: &str, memory_mb: u32, cpus: u32) -> ToolCommand {
    ToolCommand::new("linuxkit")
        .args(["run", "qemu", "-mem"])
        .arg(memory_mb.to_string())
        .arg("-cpus")
        .arg(cpus.to_string())
        .arg(image_name)
}

/// Patch the template for `vm`, write it out, then build and boot the image.
pub(crate) fn run(
    vm: &VmRun,
    images: &Images,
    runner: &mut dyn ProcessRunner,
) -> Result<ToolStatus> {
    let settings = &vm.settings;
    let base = VmTemplate::load(&settings.template)?;
    let config = template::materialize(&base, vm, images);
    tracing::debug!(
        "{} with kernel {} and {} service(s)",
        vm.action,
        config.kernel.image,
        config.services.len()
    );
    config.write(&settings.output)?;

    let commands = [
        linuxkit_build_command(&settings.output),
        linuxkit_run_command(&settings.image_name, settings.memory_mb, settings.cpus),
    ];
    runner::execute(runner, &commands)
}
