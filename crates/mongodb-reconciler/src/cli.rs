//! Command line options of the `mongodb-reconciler` binary.
//!
//! ```no_run
//! use clap::Parser;
//! use mongodb_reconciler::cli::{Command, DEFAULT_MANIFEST_SEARCH_PATHS, Opts};
//!
//! # fn main() -> Result<(), mongodb_reconciler::manifest::Error> {
//! let opts = Opts::parse();
//!
//! match opts.command {
//!     Command::Run(arguments) | Command::Show(arguments) => {
//!         let manifest = arguments.manifest.load(DEFAULT_MANIFEST_SEARCH_PATHS)?;
//!         let shell = arguments.shell.build_shell();
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::{fmt, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use mongo_shell::{Credentials, MongoShell};

use crate::manifest::ManifestPath;

/// Manifest locations searched when `--manifest` is not given, in order.
pub const DEFAULT_MANIFEST_SEARCH_PATHS: &[&str] = &[
    "manifest.yaml",
    "/etc/mongodb-reconciler/manifest.yaml",
];

const MONGORC_FILE_NAME: &str = ".mongorc.js";

#[derive(Debug, Parser)]
#[command(
    name = "mongodb-reconciler",
    author,
    version,
    about = "Converges MongoDB replica sets and user accounts towards a declared state"
)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run one reconciliation pass over all declared resources.
    Run(RunArguments),

    /// Print the observed state of all declared replica sets and all existing users as YAML.
    Show(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    /// Provides the path to the desired-state manifest
    #[arg(long, short = 'm', value_name = "FILE", default_value = "", env)]
    pub manifest: ManifestPath,

    // IMPORTANT: All (flattened) sub structs should be placed at the end to ensure the help
    // headings are correct.
    #[command(flatten)]
    pub shell: ShellOptions,
}

/// How the `mongo` client is invoked.
#[derive(PartialEq, Eq, Args)]
#[command(next_help_heading = "Mongo Client Options")]
pub struct ShellOptions {
    /// The `mongo` client binary, looked up in `PATH` unless absolute.
    #[arg(long, env, default_value = "mongo")]
    pub mongo_binary: String,

    /// Startup script loaded before every command if it exists.
    ///
    /// Defaults to `$HOME/.mongorc.js`.
    #[arg(long, env, value_name = "FILE")]
    pub mongorc: Option<PathBuf>,

    /// Authenticate every session as this user against the `admin` database.
    #[arg(long, env, requires = "admin_password")]
    pub admin_username: Option<String>,

    #[arg(long, env, requires = "admin_username", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl fmt::Debug for ShellOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellOptions")
            .field("mongo_binary", &self.mongo_binary)
            .field("mongorc", &self.mongorc)
            .field("admin_username", &self.admin_username)
            .finish_non_exhaustive()
    }
}

impl ShellOptions {
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.admin_username, &self.admin_password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Returns the configured startup script, falling back to `$HOME/.mongorc.js`.
    pub fn mongorc_path(&self) -> Option<PathBuf> {
        self.mongorc.clone().or_else(|| {
            std::env::var_os("HOME").map(|home| PathBuf::from(home).join(MONGORC_FILE_NAME))
        })
    }

    pub fn build_shell(&self) -> MongoShell {
        MongoShell::new(&self.mongo_binary)
            .with_mongorc(self.mongorc_path())
            .with_credentials(self.credentials())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert();
    }

    #[test]
    fn parses_run_arguments() {
        let opts = Opts::try_parse_from([
            "mongodb-reconciler",
            "run",
            "--manifest",
            "/etc/mongodb/manifest.yaml",
            "--mongo-binary",
            "/opt/mongodb/bin/mongo",
            "--mongorc",
            "/root/.mongorc.js",
            "--admin-username",
            "admin",
            "--admin-password",
            "secret",
        ])
        .expect("arguments are valid");

        let Command::Run(arguments) = opts.command else {
            unreachable!("run was requested");
        };

        assert_eq!(
            arguments.manifest,
            ManifestPath::from(std::ffi::OsStr::new("/etc/mongodb/manifest.yaml"))
        );
        assert_eq!(arguments.shell.mongo_binary, "/opt/mongodb/bin/mongo");
        assert_eq!(
            arguments.shell.mongorc_path(),
            Some(PathBuf::from("/root/.mongorc.js"))
        );
        assert_eq!(
            arguments.shell.credentials(),
            Some(Credentials {
                username: "admin".to_owned(),
                password: "secret".to_owned(),
            })
        );
        assert!(!format!("{:?}", arguments.shell).contains("secret"));
    }

    #[test]
    fn username_requires_password() {
        let result = Opts::try_parse_from([
            "mongodb-reconciler",
            "show",
            "--admin-username",
            "admin",
        ]);

        assert!(result.is_err());
    }
}
