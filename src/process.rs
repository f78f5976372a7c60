use std::{
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A bidirectional child process with newline-delimited stdin/stdout.
///
/// The pipe itself does no locking: callers hold whatever ordered mutex
/// guards the child so writes and reads interleave correctly.
#[derive(Debug)]
pub struct ProcessPipe {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    closed: bool,
}

impl ProcessPipe {
    /// Spawns `command[0]` with the remaining elements as arguments, both
    /// standard streams piped.
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("empty command".to_owned()))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdin = child.stdin.take().unwrap();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        debug!(program = program.as_str(), pid = child.id(), "spawned");
        Ok(Self {
            program: program.clone(),
            child,
            stdin: Some(stdin),
            stdout,
            closed: false,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| Error::Closed {
            what: self.program.clone(),
        })?;
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;
        Ok(())
    }

    pub fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(Error::ChildEof {
                program: self.program.clone(),
            });
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// One request, one reply.
    pub fn exchange(&mut self, line: &str) -> Result<String> {
        self.write_line(line)?;
        self.read_line()
    }

    /// Stops the child. Graceful close signals EOF on stdin and waits for
    /// exit; forced close kills outright and tolerates errors.
    pub fn close(&mut self, force: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Dropping stdin is the only EOF signal a line-oriented child gets.
        self.stdin.take();
        if force {
            let _ = self.child.kill();
            let _ = self.child.wait();
            return Ok(());
        }
        let status = self.child.wait()?;
        if !status.success() {
            warn!(program = self.program.as_str(), %status, "child exited abnormally");
        }
        Ok(())
    }
}

impl Drop for ProcessPipe {
    fn drop(&mut self) {
        if !self.closed {
            self.stdin.take();
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
