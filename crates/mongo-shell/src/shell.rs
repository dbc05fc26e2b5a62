use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
    rc::Rc,
};

use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::{Level, debug, info, instrument};

use crate::{
    Backoff, DEFAULT_INITIAL_WAIT, ProcessRunner, RunError, Runner, Sleep, ThreadSleep,
    parse_output,
};

type Result<T, E = Error> = std::result::Result<T, E>;

/// The target used in messages when no `--host` is passed to the client.
const LOCAL_TARGET: &str = "localhost";

const CONNECTION_REFUSED_PATTERN: &str = "couldn't connect to server";
const NOT_CAUGHT_UP_PATTERN: &str = "slaveOk=false";
const AUTH_PATTERNS: &[&str] = &[
    "Authentication failed",
    "auth failed",
    "not authorized",
    "requires authentication",
];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to start the mongo client {binary:?}"))]
    Spawn {
        source: std::io::Error,
        binary: String,
    },

    #[snafu(display("unable to reach {target} after {attempts} attempt(s): {message}"))]
    Connection {
        target: String,
        attempts: u32,
        message: String,
    },

    #[snafu(display("{target} rejected the session: {message}"))]
    Auth { target: String, message: String },

    #[snafu(display("mongo client failed on {target}: {message}"))]
    Execution { target: String, message: String },

    #[snafu(display("{message}"))]
    RemoteCommand { message: String, code: Option<i64> },

    #[snafu(display("failed to parse mongo client output as JSON"))]
    ParseJson {
        source: serde_json::Error,
        output: String,
    },
}

impl Error {
    /// Returns `true` for failures which mean the host could not be talked to at all, as
    /// opposed to the host answering with something unexpected.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Execution { .. })
    }
}

/// Credentials passed to the client via `--username` and `--password`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-invocation options of [`MongoShell::execute`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOptions {
    db: String,
    host: Option<String>,
    json: bool,
    retries: u32,
    rc: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            db: "admin".to_owned(),
            host: None,
            json: true,
            retries: 0,
            rc: true,
        }
    }
}

impl ExecOptions {
    /// Runs the script in `db` instead of `admin`.
    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = db.into();
        self
    }

    /// Connects to `host` instead of the local server.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Returns the output verbatim instead of wrapping the script in `printjson`.
    pub fn raw(mut self) -> Self {
        self.json = false;
        self
    }

    /// Retries connection failures up to `retries` times with exponential backoff.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Skips loading the startup script.
    pub fn without_rc(mut self) -> Self {
        self.rc = false;
        self
    }

    fn target(&self) -> &str {
        self.host.as_deref().unwrap_or(LOCAL_TARGET)
    }
}

/// The result of a script execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Json(Value),
    Raw(String),
}

impl Output {
    /// Returns the structured result. Raw output is returned as a JSON string.
    pub fn into_json(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Raw(text) => Value::String(text),
        }
    }

    /// Returns the trimmed textual result.
    pub fn into_text(self) -> String {
        match self {
            Self::Json(Value::String(text)) => text,
            Self::Json(value) => value.to_string(),
            Self::Raw(text) => text.trim().to_owned(),
        }
    }
}

/// Fails with [`Error::RemoteCommand`] unless the server reported `ok: 1`.
///
/// The message is taken verbatim from the server's `errmsg` field.
pub fn ensure_ok(response: &Value) -> Result<()> {
    let ok = response.get("ok").and_then(Value::as_f64);

    if ok == Some(1.0) {
        return Ok(());
    }

    RemoteCommandSnafu {
        message: response
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or("command did not report success"),
        code: response.get("code").and_then(Value::as_i64),
    }
    .fail()
}

/// Executes scripts through the `mongo` client.
///
/// Cloning is cheap, the runner and sleeper are shared.
#[derive(Clone)]
pub struct MongoShell {
    binary: String,
    mongorc: Option<PathBuf>,
    credentials: Option<Credentials>,
    runner: Rc<dyn Runner>,
    sleeper: Rc<dyn Sleep>,
}

impl fmt::Debug for MongoShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoShell")
            .field("binary", &self.binary)
            .field("mongorc", &self.mongorc)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl MongoShell {
    /// Creates a shell which spawns `binary` as a child process.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            mongorc: None,
            credentials: None,
            runner: Rc::new(ProcessRunner),
            sleeper: Rc::new(ThreadSleep),
        }
    }

    pub fn with_runner(mut self, runner: impl Runner + 'static) -> Self {
        self.runner = Rc::new(runner);
        self
    }

    pub fn with_sleep(mut self, sleeper: impl Sleep + 'static) -> Self {
        self.sleeper = Rc::new(sleeper);
        self
    }

    /// Sets the startup script loaded before every script, if the file exists.
    pub fn with_mongorc(mut self, path: Option<PathBuf>) -> Self {
        self.mongorc = path;
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Executes `script` and returns its output.
    ///
    /// Connection failures, and secondaries which have not caught up yet, are retried according
    /// to [`ExecOptions::retries`]. Everything else fails immediately. A JSON result with
    /// `ok: 0` is returned as is, see [`ensure_ok`].
    #[instrument(level = Level::DEBUG, skip_all, fields(host = options.target(), db = %options.db))]
    pub fn execute(&self, script: impl Display, options: &ExecOptions) -> Result<Output> {
        let script = self.build_script(&script.to_string(), options);
        let args = self.build_args(&script, options);

        let mut backoff = Backoff::new(DEFAULT_INITIAL_WAIT, options.retries);
        let mut attempts: u32 = 0;

        let stdout = loop {
            attempts += 1;
            debug!(attempt = attempts, %script, "running mongo client");

            let message = match self.runner.run(&self.binary, &args) {
                Ok(stdout) => break stdout,
                Err(RunError::Spawn { source, .. }) => {
                    return Err(source).context(SpawnSnafu {
                        binary: &self.binary,
                    });
                }
                Err(RunError::Exit { output, .. }) => output,
            };

            if AUTH_PATTERNS.iter().any(|pattern| message.contains(pattern)) {
                return AuthSnafu {
                    target: options.target(),
                    message,
                }
                .fail();
            }

            let waiting_for = if message.contains(CONNECTION_REFUSED_PATTERN) {
                "mongod to become available"
            } else if message.contains(NOT_CAUGHT_UP_PATTERN) {
                "secondaries to sync"
            } else {
                return ExecutionSnafu {
                    target: options.target(),
                    message,
                }
                .fail();
            };

            match backoff.next() {
                Some(wait) => {
                    info!(
                        host = options.target(),
                        attempt = attempts,
                        "Waiting {} seconds for {waiting_for}",
                        wait.as_secs()
                    );
                    self.sleeper.sleep(wait);
                }
                None => {
                    return ConnectionSnafu {
                        target: options.target(),
                        attempts,
                        message,
                    }
                    .fail();
                }
            }
        };

        if options.json {
            let value = parse_output(&stdout).context(ParseJsonSnafu { output: stdout })?;
            Ok(Output::Json(value))
        } else {
            Ok(Output::Raw(stdout))
        }
    }

    fn build_script(&self, script: &str, options: &ExecOptions) -> String {
        let script = if options.json {
            format!("printjson({script})")
        } else {
            script.to_owned()
        };

        match self.mongorc_command(options) {
            Some(load) => format!("{load}; {script}"),
            None => script,
        }
    }

    fn build_args(&self, script: &str, options: &ExecOptions) -> Vec<String> {
        let mut args = vec!["--quiet".to_owned(), options.db.clone()];

        if let Some(host) = &options.host {
            args.extend(["--host".to_owned(), host.clone()]);
        }

        if let Some(Credentials { username, password }) = &self.credentials {
            args.extend([
                "--username".to_owned(),
                username.clone(),
                "--password".to_owned(),
                password.clone(),
                "--authenticationDatabase".to_owned(),
                "admin".to_owned(),
            ]);
        }

        args.extend(["--eval".to_owned(), script.to_owned()]);
        args
    }

    /// Returns the `load(…)` statement for the startup script, if one is configured and exists.
    fn mongorc_command(&self, options: &ExecOptions) -> Option<String> {
        if !options.rc {
            return None;
        }

        self.mongorc
            .as_deref()
            .filter(|path| path.is_file())
            .map(|path: &Path| format!("load({})", Value::from(path.to_string_lossy())))
    }
}
