//! Server version and capability detection.

use std::{cell::OnceCell, fmt::Display, sync::LazyLock};

use mongo_shell::{ExecOptions, MongoShell};
use regex::Regex;
use snafu::{ResultExt, Snafu, ensure};
use tracing::debug;

static LEGACY_VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^2\.4\.").expect("failed to compile legacy version regex"));

const VERSION_SCRIPT: &str = "db.version()";
const AUTHORIZATION_SCRIPT: &str = "(db.serverCmdLineOpts().parsed.security || {}).authorization";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to query the server version"))]
    QueryVersion { source: mongo_shell::Error },

    #[snafu(display("the server reported an empty version"))]
    EmptyVersion,

    #[snafu(display("failed to determine whether authorization is enabled"))]
    QueryAuthorization { source: mongo_shell::Error },
}

/// The version string reported by `db.version()`, e.g. `2.4.14` or `3.0.7`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerVersion(String);

impl ServerVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Returns `true` for the 2.4 release series, which predates the user management commands
    /// and stores roles as plain strings.
    pub fn is_legacy(&self) -> bool {
        LEGACY_VERSION_REGEX.is_match(&self.0)
    }
}

impl Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lazily queried server facts.
///
/// Both values are fetched at most once per probe. The server generation and its authorization
/// mode do not change while a reconciler runs, so they are never invalidated.
#[derive(Debug, Default)]
pub struct Probe {
    version: OnceCell<ServerVersion>,
    authorization: OnceCell<bool>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_version(&self, shell: &MongoShell) -> Result<&ServerVersion> {
        if let Some(version) = self.version.get() {
            return Ok(version);
        }

        let version = shell
            .execute(VERSION_SCRIPT, &ExecOptions::default().raw())
            .context(QueryVersionSnafu)?
            .into_text();
        ensure!(!version.is_empty(), EmptyVersionSnafu);

        debug!(%version, "detected server version");
        Ok(self.version.get_or_init(|| ServerVersion::new(version)))
    }

    pub fn is_legacy(&self, shell: &MongoShell) -> Result<bool> {
        Ok(self.server_version(shell)?.is_legacy())
    }

    /// Returns `true` if the server runs with `security.authorization: enabled`.
    ///
    /// A failure to introspect the startup options is an error, it never defaults to `false`.
    pub fn authorization_enabled(&self, shell: &MongoShell) -> Result<bool> {
        if let Some(enabled) = self.authorization.get() {
            return Ok(*enabled);
        }

        let mode = shell
            .execute(AUTHORIZATION_SCRIPT, &ExecOptions::default().raw())
            .context(QueryAuthorizationSnafu)?
            .into_text();
        let enabled = mode == "enabled";

        debug!(authorization = %mode, enabled, "detected authorization mode");
        Ok(*self.authorization.get_or_init(|| enabled))
    }
}
