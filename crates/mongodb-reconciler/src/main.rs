use std::io::Write;

use clap::Parser;
use mongodb_reconciler::{
    cli::{Command, DEFAULT_MANIFEST_SEARCH_PATHS, Opts},
    engine::{self, Engine},
    logging::{self, LOG_ENV},
    manifest,
};
use serde::Serialize;
use snafu::{ResultExt, Snafu, ensure};
use tracing::info;

const APP_NAME: &str = "mongodb-reconciler";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    Logging { source: logging::Error },

    #[snafu(display("failed to load the manifest"))]
    LoadManifest { source: manifest::Error },

    #[snafu(display("failed to observe the current state"))]
    Show { source: engine::Error },

    #[snafu(display("failed to serialize the output"))]
    SerializeOutput { source: serde_yaml::Error },

    #[snafu(display("failed to write the output"))]
    WriteOutput { source: std::io::Error },

    #[snafu(display("{failed} of {total} resource(s) failed to converge"))]
    Unconverged { failed: usize, total: usize },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME).context(LoggingSnafu)?;

    match opts.command {
        Command::Run(arguments) => {
            let manifest = arguments
                .manifest
                .load(DEFAULT_MANIFEST_SEARCH_PATHS)
                .context(LoadManifestSnafu)?;
            let engine = Engine::new(arguments.shell.build_shell());

            let report = engine.run(&manifest);
            print_yaml(&report)?;

            let total = manifest.replica_sets.len() + manifest.users.len();
            ensure!(
                report.is_converged(),
                UnconvergedSnafu {
                    failed: report.failures.len(),
                    total,
                }
            );

            info!(resources = total, "reconciliation pass finished");
            Ok(())
        }
        Command::Show(arguments) => {
            let manifest = arguments
                .manifest
                .load(DEFAULT_MANIFEST_SEARCH_PATHS)
                .context(LoadManifestSnafu)?;
            let engine = Engine::new(arguments.shell.build_shell());

            let observed = engine.show(&manifest).context(ShowSnafu)?;
            print_yaml(&observed)
        }
    }
}

fn print_yaml(value: &impl Serialize) -> Result<(), Error> {
    let yaml = serde_yaml::to_string(value).context(SerializeOutputSnafu)?;
    std::io::stdout()
        .lock()
        .write_all(yaml.as_bytes())
        .context(WriteOutputSnafu)
}
