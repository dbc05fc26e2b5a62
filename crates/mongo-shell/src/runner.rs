use std::process::Command;

use snafu::{ResultExt, Snafu};

/// Errors returned by a single [`Runner`] invocation.
#[derive(Debug, Snafu)]
pub enum RunError {
    #[snafu(display("failed to spawn {program:?}"))]
    Spawn {
        source: std::io::Error,
        program: String,
    },

    /// The client ran but exited unsuccessfully. `output` holds both stdout and stderr, because
    /// the mongo client reports most failures on stdout.
    #[snafu(display("{program:?} exited with code {code:?}: {output}"))]
    Exit {
        program: String,
        code: Option<i32>,
        output: String,
    },
}

/// Executes a program with an argument list and returns its standard output.
///
/// This is the seam between the reconciler and the operating system. [`ProcessRunner`] is the
/// production implementation; tests substitute a scripted one.
pub trait Runner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, RunError>;
}

/// Runs the program as a child process and waits for it to finish.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl Runner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, RunError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .context(SpawnSnafu { program })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);

            ExitSnafu {
                program,
                code: output.status.code(),
                output: format!("{stdout}{stderr}").trim().to_owned(),
            }
            .fail()
        }
    }
}
