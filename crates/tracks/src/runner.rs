use std::process::{Command, ExitStatus};

use color_eyre::eyre::{Context, Result};

use crate::command::ToolCommand;

/// Exit status of an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ToolStatus {
    /// `None` when the process was killed by a signal
    code: Option<i32>,
}

impl ToolStatus {
    pub(crate) const SUCCESS: ToolStatus = ToolStatus { code: Some(0) };

    #[cfg(test)]
    pub(crate) fn from_code(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Code this process should exit with to pass the status on.
    pub(crate) fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

impl From<ExitStatus> for ToolStatus {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Seam between orchestration and the processes it spawns.
pub(crate) trait ProcessRunner {
    /// Execute the command to completion. A non-zero exit is not an error;
    /// `Err` means the process could not be spawned at all.
    fn run(&mut self, command: &ToolCommand) -> Result<ToolStatus>;

    fn describe(&self, command: &ToolCommand) -> String {
        command.describe()
    }
}

/// Spawns real processes with inherited stdio.
#[derive(Debug, Default)]
pub(crate) struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&mut self, command: &ToolCommand) -> Result<ToolStatus> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        tracing::trace!("exec: {cmd:?}");
        let status = cmd
            .status()
            .with_context(|| format!("Failed to execute {}", command.program))?;
        Ok(status.into())
    }
}

/// Spawns nothing; every command "succeeds".
#[derive(Debug, Default)]
pub(crate) struct DryRunRunner;

impl ProcessRunner for DryRunRunner {
    fn run(&mut self, command: &ToolCommand) -> Result<ToolStatus> {
        tracing::debug!("dry run, not executing {}", command.program);
        Ok(ToolStatus::SUCCESS)
    }
}

/// Print and run each command in order, stopping at the first failure.
///
/// Returns the status of the last command that ran.
pub(crate) fn execute(
    runner: &mut dyn ProcessRunner,
    commands: &[ToolCommand],
) -> Result<ToolStatus> {
    let mut status = ToolStatus::SUCCESS;
    for command in commands {
        println!("{}", runner.describe(command));
        status = runner.run(command)?;
        if !status.success() {
            tracing::warn!(
                "{} exited with status {}",
                command.program,
                status.exit_code()
            );
            break;
        }
    }
    Ok(status)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;

    /// Records every command and answers with scripted statuses (success once exhausted).
    #[derive(Debug, Default)]
    pub(crate) struct RecordingRunner {
        pub(crate) executed: Vec<ToolCommand>,
        pub(crate) statuses: VecDeque<ToolStatus>,
    }

    impl RecordingRunner {
        pub(crate) fn with_statuses(statuses: impl IntoIterator<Item = ToolStatus>) -> Self {
            Self {
                executed: Vec::new(),
                statuses: statuses.into_iter().collect(),
            }
        }

        pub(crate) fn described(&self) -> Vec<String> {
            self.executed.iter().map(ToolCommand::describe).collect()
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn run(&mut self, command: &ToolCommand) -> Result<ToolStatus> {
            self.executed.push(command.clone());
            Ok(self.statuses.pop_front().unwrap_or(ToolStatus::SUCCESS))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;

    fn commands() -> Vec<ToolCommand> {
        vec![
            ToolCommand::new("first").arg("a"),
            ToolCommand::new("second").arg("b"),
        ]
    }

    #[test]
    fn test_execute_runs_in_order() -> Result<()> {
        let mut runner = RecordingRunner::default();
        let status = execute(&mut runner, &commands())?;
        assert!(status.success());
        assert_eq!(runner.described(), vec!["first a", "second b"]);
        Ok(())
    }

    #[test]
    fn test_execute_stops_on_failure() -> Result<()> {
        let mut runner = RecordingRunner::with_statuses([ToolStatus::from_code(3)]);
        let status = execute(&mut runner, &commands())?;
        assert_eq!(status, ToolStatus::from_code(3));
        assert_eq!(status.exit_code(), 3);
        assert_eq!(runner.executed.len(), 1);
        Ok(())
    }

    #[test]
    fn test_signal_maps_to_failure() {
        let killed = ToolStatus { code: None };
        assert!(!killed.success());
        assert_eq!(killed.exit_code(), 1);
    }

    #[test]
    fn test_dry_run_spawns_nothing() -> Result<()> {
        let mut runner = DryRunRunner;
        let status = execute(
            &mut runner,
            &[ToolCommand::new("/nonexistent/definitely-not-a-tool")],
        )?;
        assert!(status.success());
        Ok(())
    }

    #[test]
    fn test_system_runner_reports_exit_code() -> Result<()> {
        let mut runner = SystemRunner;
        let ok = runner.run(&ToolCommand::new("sh").args(["-c", "exit 0"]))?;
        assert!(ok.success());
        let failed = runner.run(&ToolCommand::new("sh").args(["-c", "exit 7"]))?;
        assert_eq!(failed.exit_code(), 7);
        assert!(runner
            .run(&ToolCommand::new("/nonexistent/definitely-not-a-tool"))
            .is_err());
        Ok(())
    }
}
