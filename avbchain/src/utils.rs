use std::{
    ffi::OsStr,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    process::Stdio,
};

use colored::Colorize;

use crate::error::{Error, IoContext, Result};

/// `std::process::Command` that echoes itself and turns a non-zero exit
/// status into [`Error::ExternalTool`].
pub struct Command {
    inner: std::process::Command,
    program: PathBuf,
}

impl Deref for Command {
    type Target = std::process::Command;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Command {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Command {
    pub fn new<S>(program: S, workdir: &Path) -> Command
    where
        S: AsRef<OsStr>,
    {
        let mut cmd = std::process::Command::new(&program);
        cmd.current_dir(workdir);

        Self {
            program: PathBuf::from(program.as_ref()),
            inner: cmd,
        }
    }

    pub fn arg<S>(&mut self, arg: S) -> &mut Command
    where
        S: AsRef<OsStr>,
    {
        self.inner.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    pub fn print_cmd(&self) {
        let mut cmd_str = self.get_program().to_string_lossy().to_string();

        for arg in self.get_args() {
            cmd_str += " ";
            cmd_str += arg.to_string_lossy().as_ref();
        }

        debug!("{}", cmd_str.purple().bold());
    }

    /// Runs to completion. stdin and stdout stay attached to the terminal so
    /// passphrase prompts work; stderr is captured for the error message.
    pub fn run(&mut self) -> Result<()> {
        self.exec(false).map(|_| ())
    }

    /// Runs to completion and returns what the program wrote to stdout.
    pub fn read_stdout(&mut self) -> Result<Vec<u8>> {
        self.exec(true)
    }

    /// Runs with all output discarded and only reports whether it succeeded.
    pub fn succeeds(&mut self) -> Result<bool> {
        self.print_cmd();
        let status = self
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_path(&self.program)?;
        Ok(status.success())
    }

    fn exec(&mut self, capture_stdout: bool) -> Result<Vec<u8>> {
        self.print_cmd();

        let stdout = if capture_stdout {
            Stdio::piped()
        } else {
            Stdio::inherit()
        };
        let out = self
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|child| child.wait_with_output())
            .with_path(&self.program)?;

        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        if !out.status.success() {
            return Err(Error::ExternalTool {
                program: self.program.display().to_string(),
                status: out.status,
                stderr,
            });
        }
        if !stderr.is_empty() {
            debug!("{stderr}");
        }

        Ok(out.stdout)
    }
}

/// Paths in `dir` matching `pattern`, in alphabetical order.
pub fn glob_sorted(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!(
        "{}/{pattern}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let paths = glob::glob(&full).map_err(|e| Error::Parse(format!("{full}: {e}")))?;

    let mut out = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => out.push(path),
            Err(e) => {
                let path = e.path().to_path_buf();
                return Err(Error::Io(path, e.into()));
            }
        }
    }
    out.sort();
    Ok(out)
}

/// `path` made absolute against the current directory, for commands that run
/// somewhere else.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_path(path)
}
