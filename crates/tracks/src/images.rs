//! Container image naming for kernels and benchmark payloads.
//!
//! Every image this tool builds or boots lives under one namespace
//! (`tracks` unless overridden with `--namespace`). Build steps tag images
//! without an explicit version; the linuxkit template references them by
//! their `:latest` tag.

use crate::invocation::{KernelFlavor, Suite};

/// Namespace used when none is given on the command line
pub(crate) const DEFAULT_NAMESPACE: &str = "tracks";

const LATEST: &str = "latest";

/// Derives image tags from a namespace.
#[derive(Debug, Clone)]
pub(crate) struct Images {
    namespace: String,
}

impl Images {
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Tag given to a kernel image when it is built, e.g. `tracks/linux-cfi-full`.
    pub(crate) fn kernel_tag(&self, flavor: &KernelFlavor) -> String {
        match flavor {
            KernelFlavor::Baseline => format!("{}/linux", self.namespace),
            KernelFlavor::Coverage => format!("{}/linux-gcov", self.namespace),
            KernelFlavor::Hardened(hardening) => format!(
                "{}/linux-{}-{}",
                self.namespace, hardening.mitigation, hardening.level
            ),
        }
    }

    /// Reference to a kernel image as consumed by the VM template.
    pub(crate) fn kernel_image(&self, flavor: &KernelFlavor) -> String {
        format!("{}:{LATEST}", self.kernel_tag(flavor))
    }

    /// Tag given to a benchmark suite container, e.g. `tracks/nas`.
    pub(crate) fn suite_tag(&self, suite: Suite) -> String {
        format!("{}/{}", self.namespace, suite)
    }

    /// Reference to a benchmark suite container as consumed by the VM template.
    pub(crate) fn suite_image(&self, suite: Suite) -> String {
        format!("{}:{LATEST}", self.suite_tag(suite))
    }
}

impl Default for Images {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}
