use mongo_shell::{ExecOptions, MongoShell};
use serde_json::Value;
use snafu::ResultExt;
use tracing::debug;

use crate::replset::{QueryPrimarySnafu, Result};

const PRIMARY_SCRIPT: &str = "db.isMaster().primary";

/// Asks `host` which member it considers to be the primary.
///
/// Returns [`None`] if the host is unreachable or does not know a primary. Any other failure,
/// such as a rejected session, is an error.
pub fn query_primary(shell: &MongoShell, host: &str) -> Result<Option<String>> {
    match shell.execute(PRIMARY_SCRIPT, &ExecOptions::default().host(host)) {
        Ok(output) => match output.into_json() {
            Value::String(primary) if !primary.is_empty() => Ok(Some(primary)),
            _ => {
                debug!(host, "host does not report a primary");
                Ok(None)
            }
        },
        Err(error) if error.is_unreachable() => {
            debug!(host, %error, "failed to query primary");
            Ok(None)
        }
        Err(error) => Err(error).context(QueryPrimarySnafu { host }),
    }
}

/// Returns the primary reported by the first host which knows one. Later hosts are not queried.
pub fn find_master<I>(shell: &MongoShell, hosts: I) -> Result<Option<String>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    for host in hosts {
        if let Some(primary) = query_primary(shell, host.as_ref())? {
            return Ok(Some(primary));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use mongo_shell::testing::{Response, ScriptedRunner};

    use super::*;
    use crate::{replset::Error, test_utils::shell};

    #[test]
    fn stops_at_the_first_answer() {
        let runner = ScriptedRunner::new();
        runner.respond(
            Some("db1:27017"),
            PRIMARY_SCRIPT,
            Response::failure("Error: couldn't connect to server db1:27017"),
        );
        runner.respond(Some("db2:27017"), PRIMARY_SCRIPT, Response::stdout("undefined\n"));
        runner.respond(Some("db3:27017"), PRIMARY_SCRIPT, Response::stdout("\"db1:27017\"\n"));
        runner.respond(Some("db4:27017"), PRIMARY_SCRIPT, Response::stdout("\"db4:27017\"\n"));

        let master = find_master(
            &shell(&runner),
            ["db1:27017", "db2:27017", "db3:27017", "db4:27017"],
        )
        .expect("db3 knows the primary");

        assert_eq!(master.as_deref(), Some("db1:27017"));
        assert!(runner.invocations_of(PRIMARY_SCRIPT).iter().all(|i| i.host() != Some("db4:27017")));
        assert_eq!(runner.invocations().len(), 3);
    }

    #[test]
    fn no_primary_anywhere() {
        let runner = ScriptedRunner::new();
        runner.respond(Some("db1:27017"), PRIMARY_SCRIPT, Response::stdout("undefined\n"));

        assert_eq!(
            find_master(&shell(&runner), ["db1:27017"]).expect("db1 answers"),
            None
        );
        assert_eq!(
            find_master(&shell(&runner), Vec::<String>::new()).expect("nothing to query"),
            None
        );
    }

    #[test]
    fn rejected_session_is_an_error() {
        let runner = ScriptedRunner::new();
        runner.respond(
            Some("db1:27017"),
            PRIMARY_SCRIPT,
            Response::failure("Error: Authentication failed."),
        );
        runner.respond(Some("db2:27017"), PRIMARY_SCRIPT, Response::stdout("\"db2:27017\"\n"));

        let error = find_master(&shell(&runner), ["db1:27017", "db2:27017"])
            .expect_err("auth errors are not treated as unknown primaries");

        assert!(matches!(
            &error,
            Error::QueryPrimary { source: mongo_shell::Error::Auth { .. }, host } if host == "db1:27017"
        ));
        assert_eq!(runner.invocations().len(), 1);
    }
}
