use std::process::{Command, Stdio};

use anyhow::Result;
use tracing::debug;

use crate::PgrError;

/// Captured outcome of one external command: output lines (stdout and
/// stderr merged, trailing whitespace stripped) plus the exit status.
#[derive(Debug, Default, Clone)]
pub struct RunResult {
    lines: Vec<String>,
    status: i32,
}

impl RunResult {
    pub fn new(lines: Vec<String>, status: i32) -> Self {
        RunResult { lines, status }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn status(&self) -> i32 {
        self.status
    }

    pub fn good(&self) -> bool {
        self.status == 0
    }
}

/// Runs commands on behalf of one initiator. The single seam between the
/// harness and the outside world; the shell implementation talks to real
/// devices, the simulator answers from an in-process target.
pub trait Executor {
    fn run(&self, argv: &[String]) -> Result<RunResult>;
}

/// Executes commands as local blocking subprocesses.
///
/// ```no_run
/// use pgr::{Executor, Shell};
///
/// let res = Shell.run(&["sg_inq".to_string(), "/dev/sdc".to_string()])?;
/// # anyhow::Ok(())
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Shell;

impl Executor for Shell {
    fn run(&self, argv: &[String]) -> Result<RunResult> {
        let (prog, args) = argv
            .split_first()
            .ok_or_else(|| PgrError::BadConfig("empty command".to_string()))?;

        debug!("running command: {}", argv.join(" "));
        let out = Command::new(prog)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        let mut lines = Vec::new();
        for chunk in [&out.stdout, &out.stderr] {
            for line in String::from_utf8_lossy(chunk).lines() {
                debug!("output=/{}/", line.trim_end());
                lines.push(line.trim_end().to_string());
            }
        }

        let status = out.status.code().unwrap_or(-1);
        if status != 0 {
            debug!("process returned: {}", status);
        }

        Ok(RunResult::new(lines, status))
    }
}

/// Probe that a tool exists and is runnable, usually via its version flag.
pub fn verify_exists<E: Executor>(exec: &E, argv: &[&str]) -> Result<()> {
    let owned = argv.iter().map(|s| s.to_string()).collect::<Vec<String>>();
    match exec.run(&owned) {
        Ok(_) => Ok(()),
        Err(_) => anyhow::bail!(PgrError::MissingTool(argv[0].to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_captures_lines_and_status() -> Result<()> {
        let res = Shell.run(&["true".to_string()])?;
        assert!(res.good());

        let res = Shell.run(&["false".to_string()])?;
        assert!(!res.good());
        Ok(())
    }

    #[test]
    fn test_missing_tool_is_an_error() {
        let argv = ["no-such-tool-exists", "-V"];
        assert!(verify_exists(&Shell, &argv).is_err());
    }
}
