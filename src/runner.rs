use crate::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use tokio::process::Command;

/// An external program invocation. Arguments are passed as-is, no shell is
/// involved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

pub async fn run(spec: &CommandSpec) -> Result<()> {
    //! Runs the command with inherited stdio and waits for it.
    tracing::info!("Running: {}", spec);
    let status = Command::new(&spec.program)
        .args(&spec.args)
        .status()
        .await
        .map_err(|e| Error::Spawn {
            command: spec.program.display().to_string(),
            source: e,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::CommandFailed {
            command: spec.program.display().to_string(),
            status: status.to_string(),
        })
    }
}
