//! linuxkit VM template handling.
//!
//! The base template is a human-edited linuxkit YAML file. Only the parts
//! this tool patches are modelled (`kernel.image`, `files`, `services`);
//! every other key, at the top level or inside an entry, is carried through
//! untouched via flattened mappings.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::images::Images;
use crate::invocation::{Suite, VmAction, VmRun};

/// Permission bits for control scripts shipped into the VM
const SCRIPT_MODE: &str = "0755";

/// DNS config and the SSH key used by the control scripts, bound into the suite container
const RESOLV_CONF_BIND: &str = "/etc/resolv.conf:/etc/resolv.conf";
const SSH_KEY_BIND: &str = "/qemu-ssh-access:/root/.ssh/id_ed25519";

/// A linuxkit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmTemplate {
    pub kernel: KernelSection,

    #[serde(default)]
    pub files: Vec<FileMount>,

    #[serde(default)]
    pub services: Vec<Service>,

    /// `init`, `onboot`, `trust`, ...
    #[serde(flatten)]
    pub extra: Mapping,
}

/// The `kernel` section; `cmdline` and friends live in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSection {
    pub image: String,

    #[serde(flatten)]
    pub extra: Mapping,
}

/// An entry of `files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMount {
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(flatten)]
    pub extra: Mapping,
}

impl FileMount {
    /// Expose a host script at the same relative path inside the VM.
    pub(crate) fn script(name: &str) -> Self {
        Self {
            path: name.to_owned(),
            source: Some(name.to_owned()),
            mode: Some(SCRIPT_MODE.to_owned()),
            extra: Mapping::new(),
        }
    }
}

/// An entry of `services`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,

    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,

    #[serde(flatten)]
    pub extra: Mapping,
}

impl Service {
    /// The benchmark suite container, idling until the control script drives it over SSH.
    pub(crate) fn suite_payload(suite: Suite, action: VmAction, images: &Images) -> Self {
        let script = action.script();
        Self {
            name: images.suite_tag(suite),
            image: images.suite_image(suite),
            env: vec![suite.env_flag(), format!("ACTION={action}")],
            command: ["/bin/sh", "-c", "/usr/bin/sleep infinity"]
                .map(String::from)
                .to_vec(),
            capabilities: vec!["ALL".to_owned()],
            binds: vec![
                RESOLV_CONF_BIND.to_owned(),
                SSH_KEY_BIND.to_owned(),
                format!("/{script}:/root/{script}"),
            ],
            extra: Mapping::new(),
        }
    }
}

/// Failures reading or writing template files.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Failed to read template {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse template {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to serialize linuxkit config")]
    Serialize(#[source] serde_yaml::Error),
    #[error("Failed to write linuxkit config {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VmTemplate {
    pub(crate) fn parse(path: &Utf8Path, contents: &str) -> Result<Self, TemplateError> {
        serde_yaml::from_str(contents).map_err(|source| TemplateError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Read the base template from disk.
    pub(crate) fn load(path: &Utf8Path) -> Result<Self, TemplateError> {
        tracing::debug!("Loading template {path}");
        let contents = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(path, &contents)
    }

    pub(crate) fn to_yaml(&self) -> Result<String, TemplateError> {
        serde_yaml::to_string(self).map_err(TemplateError::Serialize)
    }

    /// Serialize to `path`, replacing whatever was there.
    pub(crate) fn write(&self, path: &Utf8Path) -> Result<(), TemplateError> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(|source| TemplateError::Write {
            path: path.to_owned(),
            source,
        })?;
        tracing::debug!("Wrote linuxkit config {path}");
        Ok(())
    }
}

/// Patch a base template for one VM run, leaving `base` untouched.
pub(crate) fn materialize(base: &VmTemplate, run: &VmRun, images: &Images) -> VmTemplate {
    let mut template = base.clone();
    template.kernel.image = images.kernel_image(&run.kernel);
    template
        .files
        .push(FileMount::script(&run.action.script()));

    let wants_payload = match run.action {
        VmAction::Profile => true,
        VmAction::Benchmark => run.suite != Suite::Ubuntu,
    };
    if wants_payload {
        template
            .services
            .push(Service::suite_payload(run.suite, run.action, images));
    }
    template
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{Hardening, KernelFlavor, Level, Mitigation, VmSettings};
    use indoc::indoc;

    const BASE: &str = indoc! {r#"
        kernel:
          image: linuxkit/kernel:5.15.27
          cmdline: "console=tty0 console=ttyS0"
        init:
          - linuxkit/init:v0.8
          - linuxkit/runc:v0.8
        onboot:
          - name: dhcpcd
            image: linuxkit/dhcpcd:v0.8
            command: ["/sbin/dhcpcd", "--nobackground", "-f", "/dhcpcd.conf", "-1"]
        services:
          - name: sshd
            image: linuxkit/sshd:v0.8
            binds:
              - /root/.ssh:/root/.ssh
        files:
          - path: root/.ssh/authorized_keys
            source: ~/.ssh/id_ed25519.pub
            mode: "0600"
            optional: true
        trust:
          org:
            - linuxkit
    "#};

    fn base() -> VmTemplate {
        VmTemplate::parse(Utf8Path::new("base.yml"), BASE).unwrap()
    }

    fn vm_run(action: VmAction, suite: Suite, kernel: KernelFlavor) -> VmRun {
        VmRun {
            action,
            suite,
            kernel,
            settings: VmSettings {
                memory_mb: 32768,
                cpus: 8,
                template: "linuxkit.yml.template".into(),
                output: "linuxkit.yml".into(),
                image_name: "linuxkit".into(),
            },
        }
    }

    #[test]
    fn test_parse_keeps_unknown_keys() {
        let template = base();
        assert_eq!(template.kernel.image, "linuxkit/kernel:5.15.27");
        assert!(template.kernel.extra.contains_key("cmdline"));
        assert!(template.extra.contains_key("init"));
        assert!(template.extra.contains_key("onboot"));
        assert!(template.extra.contains_key("trust"));
        assert_eq!(template.files.len(), 1);
        assert!(template.files[0].extra.contains_key("optional"));
        assert_eq!(template.services.len(), 1);
        assert!(template.services[0].env.is_empty());
    }

    #[test]
    fn test_profile_adds_script_and_service() {
        let base = base();
        let run = vm_run(VmAction::Profile, Suite::Nas, KernelFlavor::Coverage);
        let patched = materialize(&base, &run, &Images::default());

        assert_eq!(patched.kernel.image, "tracks/linux-gcov:latest");
        assert_eq!(patched.files.len(), base.files.len() + 1);
        assert_eq!(patched.services.len(), base.services.len() + 1);

        let file = patched.files.last().unwrap();
        assert_eq!(file.path, "profile.sh");
        assert_eq!(file.source.as_deref(), Some("profile.sh"));
        assert_eq!(file.mode.as_deref(), Some("0755"));

        let service = patched.services.last().unwrap();
        assert_eq!(service.name, "tracks/nas");
        assert_eq!(service.image, "tracks/nas:latest");
        assert_eq!(service.env, vec!["NAS=true", "ACTION=profile"]);
        assert_eq!(
            service.command,
            vec!["/bin/sh", "-c", "/usr/bin/sleep infinity"]
        );
        assert_eq!(service.capabilities, vec!["ALL"]);
        assert_eq!(
            service.binds,
            vec![
                "/etc/resolv.conf:/etc/resolv.conf",
                "/qemu-ssh-access:/root/.ssh/id_ed25519",
                "/profile.sh:/root/profile.sh",
            ]
        );

        // The base value is never modified
        assert_eq!(base, self::base());
    }

    #[test]
    fn test_profile_ubuntu_still_gets_service() {
        let run = vm_run(VmAction::Profile, Suite::Ubuntu, KernelFlavor::Coverage);
        let patched = materialize(&base(), &run, &Images::default());
        assert_eq!(patched.services.len(), 2);
        assert_eq!(patched.services[1].env[0], "UBUNTU=true");
    }

    #[test]
    fn test_benchmark_hardened_kernel() {
        let base = base();
        let kernel = KernelFlavor::Hardened(Hardening {
            mitigation: Mitigation::Cfi,
            level: Level::Selective,
        });
        let run = vm_run(VmAction::Benchmark, Suite::Ubuntu, kernel);
        let patched = materialize(&base, &run, &Images::default());

        assert_eq!(patched.kernel.image, "tracks/linux-cfi-selective:latest");
        assert_eq!(patched.kernel.extra, base.kernel.extra);
        assert_eq!(&patched.files[..base.files.len()], &base.files[..]);
        assert_eq!(patched.files.len(), base.files.len() + 1);
        assert_eq!(patched.files.last().unwrap().path, "benchmark.sh");
        // The ubuntu baseline has no payload container
        assert_eq!(patched.services, base.services);
        assert_eq!(patched.extra, base.extra);
    }

    #[test]
    fn test_benchmark_suite_payload() {
        let run = vm_run(VmAction::Benchmark, Suite::Spec, KernelFlavor::Baseline);
        let patched = materialize(&base(), &run, &Images::default());
        assert_eq!(patched.kernel.image, "tracks/linux:latest");
        let service = patched.services.last().unwrap();
        assert_eq!(service.name, "tracks/spec");
        assert_eq!(service.env, vec!["SPEC=true", "ACTION=benchmark"]);
        assert_eq!(service.binds[2], "/benchmark.sh:/root/benchmark.sh");
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let template =
            VmTemplate::parse(Utf8Path::new("t.yml"), "kernel:\n  image: k:1\n").unwrap();
        assert!(template.files.is_empty());
        assert!(template.services.is_empty());
        let run = vm_run(VmAction::Profile, Suite::Phoronix, KernelFlavor::Coverage);
        let patched = materialize(&template, &run, &Images::default());
        assert_eq!(patched.files.len(), 1);
        assert_eq!(patched.services.len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        let err = VmTemplate::parse(Utf8Path::new("t.yml"), "files: []\n").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
        assert!(err.to_string().contains("t.yml"));

        let err = VmTemplate::parse(Utf8Path::new("t.yml"), "kernel: [unclosed").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { .. }));
    }

    #[test]
    fn test_write_then_load() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap();
        let output = dir.join("linuxkit.yml");
        std::fs::write(&output, "stale content that is longer than nothing")?;

        let run = vm_run(VmAction::Profile, Suite::Nas, KernelFlavor::Coverage);
        let patched = materialize(&base(), &run, &Images::default());
        patched.write(&output)?;

        let reloaded = VmTemplate::load(&output)?;
        assert_eq!(reloaded, patched);
        Ok(())
    }

    #[test]
    fn test_load_missing_file() -> color_eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let dir = Utf8Path::from_path(td.path()).unwrap();
        let err = VmTemplate::load(&dir.join("nope.yml.template")).unwrap_err();
        assert!(matches!(err, TemplateError::Read { .. }));
        Ok(())
    }
}
