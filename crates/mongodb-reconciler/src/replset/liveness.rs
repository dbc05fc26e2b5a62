use indexmap::IndexSet;
use mongo_shell::{Call, ExecOptions, MongoShell};
use serde_json::Value;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::replset::{ConflictingReplicaSetSnafu, NotReplicatedSnafu, QueryStatusSnafu, Result};

const NOT_REPLICATED_ERRMSG: &str = "not running with --replSet";
const NOT_YET_INITIALIZED_CODE_NAME: &str = "NotYetInitialized";

/// What a candidate host reported about itself via `rs.status()`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostStatus {
    /// Reachable and already a member of the desired set.
    AliveMember,

    /// Reachable, started with `--replSet` but not part of any configuration yet.
    AliveUnconfigured,

    /// Reachable but a member of a differently named set.
    AliveForeign { set: String },

    /// Not reachable.
    Dead,
}

/// Candidate hosts split by reachability, each side in input order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    pub alive: IndexSet<String>,
    pub dead: IndexSet<String>,
}

/// Classifies the `rs.status()` response of `host` for the replica set `set_name`.
///
/// A host which does not run with `--replSet` at all can never become a member and fails the
/// classification.
pub fn classify(set_name: &str, host: &str, status: &Value) -> Result<HostStatus> {
    if status.get("errmsg").and_then(Value::as_str) == Some(NOT_REPLICATED_ERRMSG) {
        return NotReplicatedSnafu {
            name: set_name,
            host,
        }
        .fail();
    }

    if let Some(set) = status.get("set").and_then(Value::as_str) {
        return Ok(if set == set_name {
            HostStatus::AliveMember
        } else {
            HostStatus::AliveForeign {
                set: set.to_owned(),
            }
        });
    }

    let unconfigured = status.get("info").is_some()
        || status.get("codeName").and_then(Value::as_str) == Some(NOT_YET_INITIALIZED_CODE_NAME);

    if unconfigured {
        return Ok(HostStatus::AliveUnconfigured);
    }

    debug!(host, %status, "unrecognized replica set status, treating host as dead");
    Ok(HostStatus::Dead)
}

/// Queries `rs.status()` on `host` itself and classifies the answer.
///
/// Hosts which cannot be reached are [`HostStatus::Dead`]. Other client failures, such as a
/// rejected session, are errors.
pub fn probe_host(shell: &MongoShell, set_name: &str, host: &str) -> Result<HostStatus> {
    debug!(host, "checking replica set member");

    match shell.execute(Call::new("rs.status"), &ExecOptions::default().host(host)) {
        Ok(output) => classify(set_name, host, &output.into_json()),
        Err(error) if error.is_unreachable() => {
            warn!(host, "Can't connect to replica set member");
            debug!(host, %error, "replica set member is unreachable");
            Ok(HostStatus::Dead)
        }
        Err(error) => Err(error).context(QueryStatusSnafu { host }),
    }
}

/// Splits `candidates` into alive and dead hosts.
///
/// Hosts are probed one after another. The first host which turns out to be a member of another
/// replica set aborts the whole partitioning.
pub fn partition(shell: &MongoShell, set_name: &str, candidates: &[String]) -> Result<Partition> {
    let mut partition = Partition::default();

    for host in candidates {
        match probe_host(shell, set_name, host)? {
            HostStatus::AliveMember => {
                debug!(host, replica_set = set_name, "host is available for the replica set");
                partition.alive.insert(host.clone());
            }
            HostStatus::AliveUnconfigured => {
                debug!(host, "host is alive but unconfigured");
                partition.alive.insert(host.clone());
            }
            HostStatus::AliveForeign { set } => {
                return ConflictingReplicaSetSnafu {
                    name: set_name,
                    host,
                    other: set,
                }
                .fail();
            }
            HostStatus::Dead => {
                partition.dead.insert(host.clone());
            }
        }
    }

    Ok(partition)
}
