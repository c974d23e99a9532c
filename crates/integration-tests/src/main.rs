//! Integration tests for tracks
//!
//! Every test drives the real binary with `--dry-run` inside a scratch
//! directory, so neither docker nor linuxkit is needed.

use std::process::Output;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use indoc::indoc;
use libtest_mimic::{Arguments, Trial};
use serde_yaml::Value;
use xshell::{cmd, Shell};

const TEMPLATE: &str = indoc! {"
    kernel:
      image: linuxkit/kernel:5.15.27
      cmdline: console=ttyS0
    init:
      - linuxkit/init:v0.8
      - linuxkit/runc:v0.8
    services:
      - name: sshd
        image: linuxkit/sshd:v0.8
    files:
      - path: etc/motd
        contents: hello
"};

/// Get the path to the tracks binary, checking TRACKS_PATH env var first, then falling back to "tracks"
fn get_tracks_command() -> Result<String> {
    if let Ok(path) = std::env::var("TRACKS_PATH") {
        // Tests change directory, so pin relative paths now
        let path = std::fs::canonicalize(&path)
            .with_context(|| format!("Resolving TRACKS_PATH={path}"))?;
        return path
            .into_os_string()
            .into_string()
            .map_err(|p| eyre!("Non-UTF-8 TRACKS_PATH: {p:?}"));
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/tracks", "target/release/tracks"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set TRACKS_PATH={path} to run using this binary"
        ));
    }
    Ok("tracks".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
struct CapturedOutput {
    output: Output,
    stdout: String,
    stderr: String,
}

impl CapturedOutput {
    fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    fn assert_success(&self, context: &str) {
        assert!(
            self.output.status.success(),
            "{} failed: {}",
            context,
            self.stderr
        );
    }

    fn exit_code(&self) -> Option<i32> {
        self.output.status.code()
    }

    fn lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }
}

/// A scratch working directory with a shell rooted in it
struct Workdir {
    _td: tempfile::TempDir,
    dir: Utf8PathBuf,
    sh: Shell,
    tracks: String,
}

impl Workdir {
    fn new() -> Result<Self> {
        let tracks = get_tracks_command()?;
        let td = tempfile::tempdir()?;
        let dir = Utf8PathBuf::from_path_buf(td.path().to_owned())
            .map_err(|p| eyre!("Non-UTF-8 tempdir: {p:?}"))?;
        let sh = Shell::new()?;
        sh.change_dir(&dir);
        Ok(Self {
            _td: td,
            dir,
            sh,
            tracks,
        })
    }

    fn with_template() -> Result<Self> {
        let w = Self::new()?;
        std::fs::write(w.dir.join("linuxkit.yml.template"), TEMPLATE)?;
        Ok(w)
    }

    fn tracks(&self, args: &[&str]) -> Result<CapturedOutput> {
        let tracks = &self.tracks;
        let output = cmd!(self.sh, "{tracks} --dry-run {args...}")
            .ignore_status()
            .output()?;
        Ok(CapturedOutput::new(output))
    }

    fn load_output(&self) -> Result<Value> {
        let contents = std::fs::read_to_string(self.dir.join("linuxkit.yml"))?;
        serde_yaml::from_str(&contents).context("Parsing generated linuxkit.yml")
    }

    fn output_exists(&self) -> bool {
        self.dir.join("linuxkit.yml").exists()
    }
}

fn seq_len(value: &Value, key: &str) -> usize {
    value[key].as_sequence().map(Vec::len).unwrap_or(0)
}

fn test_build_container() -> Result<()> {
    let w = Workdir::new()?;
    let out = w.tracks(&["build", "--container", "--suite=nas"])?;
    out.assert_success("build --container");
    assert_eq!(
        out.lines(),
        vec!["docker build --target nas -t tracks/nas -f Dockerfile.benchmark ."]
    );
    assert!(!w.output_exists());
    Ok(())
}

fn test_build_hardened_kernel() -> Result<()> {
    let w = Workdir::new()?;
    let out = w.tracks(&["build", "--kernel", "--mitigation=cfi", "--level=full"])?;
    out.assert_success("build --kernel");
    let line = out.lines().concat();
    for expected in [
        "--build-arg FEATURE=-cfi",
        "--build-arg COMPILER='LLVM=1'",
        "linux-cfi-full",
    ] {
        assert!(line.contains(expected), "missing {expected} in {line}");
    }
    Ok(())
}

fn test_build_namespace_override() -> Result<()> {
    let w = Workdir::new()?;
    let out = w.tracks(&["build", "--container", "--namespace", "lab"])?;
    out.assert_success("build --namespace");
    assert_eq!(
        out.lines(),
        vec!["docker build --target ubuntu -t lab/ubuntu -f Dockerfile.benchmark ."]
    );
    Ok(())
}

fn test_level_without_mitigation() -> Result<()> {
    let w = Workdir::with_template()?;
    for args in [
        &["build", "--kernel", "--level=full"][..],
        &["benchmark", "--level=selective"][..],
    ] {
        let out = w.tracks(args)?;
        assert_eq!(out.exit_code(), Some(2), "{args:?}: {}", out.stderr);
        assert!(
            out.stderr.contains("--level not allowed without --mitigation"),
            "{}",
            out.stderr
        );
        let usage = format!("Usage: tracks {} [OPTIONS]", args[0]);
        assert!(out.stderr.contains(&usage), "{}", out.stderr);
        assert!(out.stdout.is_empty());
    }
    assert!(!w.output_exists());
    Ok(())
}

fn test_out_of_range_values() -> Result<()> {
    let w = Workdir::with_template()?;
    for args in [
        &["build", "--container", "--suite=gromacs"][..],
        &["benchmark", "--mitigation=aslr", "--level=full"][..],
        &["benchmark", "--mitigation=cfi", "--level=partial"][..],
    ] {
        let out = w.tracks(args)?;
        assert_eq!(out.exit_code(), Some(2), "{args:?}: {}", out.stderr);
    }
    assert!(!w.output_exists());
    Ok(())
}

fn test_profile() -> Result<()> {
    let w = Workdir::with_template()?;
    let out = w.tracks(&["profile", "--suite=phoronix"])?;
    out.assert_success("profile");
    assert_eq!(
        out.lines(),
        vec![
            "linuxkit build -disable-content-trust linuxkit.yml",
            "linuxkit run qemu -mem 32768 -cpus 8 linuxkit",
        ]
    );

    let base: Value = serde_yaml::from_str(TEMPLATE)?;
    let config = w.load_output()?;
    assert_eq!(seq_len(&config, "services"), seq_len(&base, "services") + 1);
    assert_eq!(seq_len(&config, "files"), seq_len(&base, "files") + 1);
    assert_eq!(config["kernel"]["image"].as_str(), Some("tracks/linux-gcov:latest"));
    assert_eq!(config["files"][1]["path"].as_str(), Some("profile.sh"));
    assert_eq!(config["services"][1]["image"].as_str(), Some("tracks/phoronix:latest"));
    assert_eq!(config["init"], base["init"]);
    Ok(())
}

fn test_benchmark() -> Result<()> {
    let w = Workdir::with_template()?;
    let out = w.tracks(&[
        "benchmark",
        "--mitigation=stackguard",
        "--level=selective",
        "--memory=16G",
        "--cpus=4",
    ])?;
    out.assert_success("benchmark");
    assert_eq!(
        out.lines()[1],
        "linuxkit run qemu -mem 16384 -cpus 4 linuxkit"
    );

    let config = w.load_output()?;
    assert_eq!(
        config["kernel"]["image"].as_str(),
        Some("tracks/linux-stackguard-selective:latest")
    );
    assert_eq!(config["files"][1]["path"].as_str(), Some("benchmark.sh"));
    assert_eq!(seq_len(&config, "services"), 1);
    Ok(())
}

fn test_missing_template() -> Result<()> {
    let w = Workdir::new()?;
    let out = w.tracks(&["profile"])?;
    assert_eq!(out.exit_code(), Some(1), "{}", out.stderr);
    assert!(out.stderr.contains("linuxkit.yml.template"), "{}", out.stderr);
    assert!(out.stdout.is_empty());
    assert!(!w.output_exists());
    Ok(())
}

const INTEGRATION_TESTS: &[(&str, fn() -> Result<()>)] = &[
    ("build_container", test_build_container),
    ("build_hardened_kernel", test_build_hardened_kernel),
    ("build_namespace_override", test_build_namespace_override),
    ("level_without_mitigation", test_level_without_mitigation),
    ("out_of_range_values", test_out_of_range_values),
    ("profile", test_profile),
    ("benchmark", test_benchmark),
    ("missing_template", test_missing_template),
];

fn main() {
    let args = Arguments::from_args();

    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|&(name, f)| Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into())))
        .collect();

    libtest_mimic::run(&args, tests).exit();
}
