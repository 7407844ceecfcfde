//! Execution of external collaborators (aligners, filters, search tools).
//!
//! Commands are assembled as argument vectors rather than shell strings, so
//! paths with spaces or quotes survive untouched. Pipelines such as
//! `bwa mem | samtools view` connect the stdout of the first process to the
//! stdin of the second and check the exit status of both.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

use crate::error::VirmetError;

/// Runs `tool` with `args`, blocking until it exits, and returns its
/// captured stdout and stderr.
///
/// A nonzero exit status fails with [`VirmetError::ExternalToolFailed`]
/// carrying the tool name, arguments and captured output.
pub fn run(tool: &str, args: &[String]) -> Result<String, VirmetError> {
    ToolCommand::new(tool).args(args).run()
}

/// A single external process invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdout: Option<PathBuf>,
    stderr: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            stdout: None,
            stderr: None,
        }
    }
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().to_string())
    }
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }
    /// Writes the process stdout to a file instead of capturing it.
    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout = Some(path.to_path_buf());
        self
    }
    /// Writes the process stderr to a file instead of capturing it.
    pub fn stderr_to(mut self, path: &Path) -> Self {
        self.stderr = Some(path.to_path_buf());
        self
    }
    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    fn command(&self) -> Result<Command, VirmetError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        match &self.stdout {
            Some(path) => { cmd.stdout(File::create(path)?); },
            None => { cmd.stdout(Stdio::piped()); },
        }
        match &self.stderr {
            Some(path) => { cmd.stderr(File::create(path)?); },
            None => { cmd.stderr(Stdio::piped()); },
        }
        Ok(cmd)
    }

    fn spawn(&self, cmd: &mut Command) -> Result<Child, VirmetError> {
        log::debug!("Running command: {}", self.display());
        cmd.spawn().map_err(|e| VirmetError::CommandExecutionFailed(self.display(), e.to_string()))
    }

    fn failure(&self, status: i32, output: String) -> VirmetError {
        VirmetError::ExternalToolFailed {
            tool: self.program.clone(),
            args: self.args.clone(),
            status,
            output,
        }
    }

    /// Runs the command to completion and returns captured output.
    pub fn run(&self) -> Result<String, VirmetError> {
        let mut cmd = self.command()?;
        let child = self.spawn(&mut cmd)?;
        let output = child
            .wait_with_output()
            .map_err(|e| VirmetError::CommandExecutionFailed(self.display(), e.to_string()))?;

        let mut captured = String::from_utf8_lossy(&output.stdout).to_string();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(self.failure(output.status.code().unwrap_or(-1), captured));
        }
        Ok(captured)
    }

    /// Runs `self | next`, returning the captured stderr of both processes
    /// (and the stdout of `next` unless redirected).
    ///
    /// A failing `next` is reported first, with the output of both processes,
    /// since an upstream process usually dies of a broken pipe in that case.
    pub fn pipe(&self, next: &ToolCommand) -> Result<String, VirmetError> {
        let mut first_cmd = self.command()?;
        first_cmd.stdout(Stdio::piped());
        let mut first = self.spawn(&mut first_cmd)?;

        let second = match self.downstream(&mut first, next) {
            Ok(child) => child,
            Err(err) => {
                let _ = first.kill();
                let _ = first.wait();
                return Err(err);
            }
        };

        // Upstream stderr is drained on its own thread; a full pipe stalls it
        let first_stderr = first.stderr.take().map(|mut stream| {
            thread::spawn(move || {
                let mut buffer = String::new();
                let _ = stream.read_to_string(&mut buffer);
                buffer
            })
        });

        let second_output = second
            .wait_with_output()
            .map_err(|e| VirmetError::CommandExecutionFailed(next.display(), e.to_string()))?;
        let first_status = first
            .wait()
            .map_err(|e| VirmetError::CommandExecutionFailed(self.display(), e.to_string()))?;

        let first_captured = match first_stderr {
            Some(handle) => handle.join().unwrap_or_default(),
            None => String::new(),
        };
        let mut second_captured = String::from_utf8_lossy(&second_output.stdout).to_string();
        second_captured.push_str(&String::from_utf8_lossy(&second_output.stderr));

        if !second_output.status.success() {
            return Err(next.failure(second_output.status.code().unwrap_or(-1), format!("{first_captured}{second_captured}")));
        }
        if !first_status.success() {
            return Err(self.failure(first_status.code().unwrap_or(-1), first_captured));
        }

        Ok(format!("{first_captured}{second_captured}"))
    }

    /// Spawns `next` reading the stdout of `first`. The parent's handle on
    /// the pipe is closed on return, so `first` sees a broken pipe once
    /// `next` exits.
    fn downstream(&self, first: &mut Child, next: &ToolCommand) -> Result<Child, VirmetError> {
        let upstream = first
            .stdout
            .take()
            .ok_or_else(|| VirmetError::CommandOutputCapture(self.display()))?;

        let mut second_cmd = next.command()?;
        second_cmd.stdin(Stdio::from(upstream));
        let second = next.spawn(&mut second_cmd);
        drop(second_cmd);
        second
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let output = run("echo", &["hello".to_string()]).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_carries_tool_and_arguments() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run()
            .unwrap_err();
        match err {
            VirmetError::ExternalToolFailed { tool, args, status, output } => {
                assert_eq!(tool, "sh");
                assert_eq!(args, vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()]);
                assert_eq!(status, 3);
                assert!(output.contains("broken"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_program_fails_to_execute() {
        let err = run("virmet-no-such-tool", &[]).unwrap_err();
        assert!(matches!(err, VirmetError::CommandExecutionFailed(..)));
    }

    #[test]
    fn stdout_redirected_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        ToolCommand::new("echo").arg("written").stdout_to(&out).run().unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "written");
    }

    #[test]
    fn pipe_connects_processes() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("piped.txt");
        ToolCommand::new("printf")
            .arg("a\nb\nc\n")
            .pipe(&ToolCommand::new("grep").arg("-v").arg("b").stdout_to(&out))
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "a\nc\n");
    }

    #[test]
    fn pipe_reports_upstream_failure() {
        let err = ToolCommand::new("sh")
            .args(["-c", "exit 2"])
            .pipe(&ToolCommand::new("cat"))
            .unwrap_err();
        assert!(matches!(err, VirmetError::ExternalToolFailed { status: 2, .. }));
    }

    #[test]
    fn pipe_reports_downstream_failure() {
        // upstream writes forever; it only stops once the pipe is closed
        let err = ToolCommand::new("yes")
            .pipe(&ToolCommand::new("sh").args(["-c", "read x; echo downstream-broke >&2; exit 5"]))
            .unwrap_err();
        match err {
            VirmetError::ExternalToolFailed { tool, status, output, .. } => {
                assert_eq!(tool, "sh");
                assert_eq!(status, 5);
                assert!(output.contains("downstream-broke"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn pipe_stops_upstream_when_downstream_cannot_start() {
        let err = ToolCommand::new("yes")
            .pipe(&ToolCommand::new("virmet-no-such-tool"))
            .unwrap_err();
        assert!(matches!(err, VirmetError::CommandExecutionFailed(cmd, _) if cmd.starts_with("virmet-no-such-tool")));
    }
}
