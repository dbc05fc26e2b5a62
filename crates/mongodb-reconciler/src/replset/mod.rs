//! Replica set membership reconciliation.
//!
//! A replica set is either not initiated yet or initiated; there is no way back. A pass
//! observes the current configuration via `rs.conf()`, determines which declared members are
//! alive and then either initiates the set with all of them or adds the missing ones through the
//! current primary. Removing members is not supported and fails loudly.

use std::fmt;

use indexmap::IndexSet;
use mongo_shell::{Call, Credentials, Document, ExecOptions, MongoShell, ensure_ok};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::{debug, info, instrument};

use crate::{context::Context, ensure::Ensure, probe};

mod liveness;
mod master;

pub use liveness::*;
pub use master::*;

/// The provider name reported in [`ReplicaSetProperties`].
pub const PROVIDER: &str = "mongo";

/// `rs.conf()` is the first command of every pass, so it waits for a starting `mongod`.
const CONFIG_RETRIES: u32 = 4;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to read the configuration of replica set {name}"))]
    ReadConfig {
        source: mongo_shell::Error,
        name: String,
    },

    #[snafu(display("failed to probe the server"))]
    Probe { source: probe::Error },

    #[snafu(display(
        "can't configure replica set {name}: host {host} is already part of replica set {other}"
    ))]
    ConflictingReplicaSet {
        name: String,
        host: String,
        other: String,
    },

    #[snafu(display(
        "can't configure replica set {name}: host {host} is not running with --replSet"
    ))]
    NotReplicated { name: String, host: String },

    #[snafu(display("failed to query the replica set status of {host}"))]
    QueryStatus {
        source: mongo_shell::Error,
        host: String,
    },

    #[snafu(display("can't connect to any member of replica set {name}"))]
    NoReachableMembers { name: String },

    #[snafu(display("can't initiate replica set {name} without any members"))]
    NoMembersDeclared { name: String },

    #[snafu(display("can't find the master host of replica set {name}"))]
    MasterNotFound { name: String },

    #[snafu(display("failed to ask {host} for the primary"))]
    QueryPrimary {
        source: mongo_shell::Error,
        host: String,
    },

    #[snafu(display("rs.initiate() failed for replica set {name}"))]
    Initiate {
        source: mongo_shell::Error,
        name: String,
    },

    #[snafu(display("rs.add() failed to add host {host} to replica set {name}"))]
    AddMember {
        source: mongo_shell::Error,
        name: String,
        host: String,
    },

    #[snafu(display("removing replica set {name} or any of its members is not supported"))]
    Unsupported { name: String },

    #[snafu(display(
        "can't remove undeclared members {members:?} from replica set {name}: removing members is not supported"
    ))]
    UndeclaredMembers { name: String, members: Vec<String> },
}

/// Credentials used for every command issued on behalf of one replica set.
#[derive(Clone, Deserialize, PartialEq, Eq, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl From<&AdminCredentials> for Credentials {
    fn from(value: &AdminCredentials) -> Self {
        Self {
            username: value.username.clone(),
            password: value.password.clone(),
        }
    }
}

/// The declared state of a replica set.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetDesired {
    pub name: String,

    #[serde(default)]
    pub ensure: Ensure,

    /// Members as `host:port`. The first alive member becomes the initial primary.
    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_credentials: Option<AdminCredentials>,
}

impl ReplicaSetDesired {
    /// Compares the declared members with `observed`, ignoring order.
    pub fn members_in_sync(&self, observed: &[String]) -> bool {
        sorted(&self.members) == sorted(observed)
    }

    /// Returns the configured members which are not declared, in configuration order.
    pub fn undeclared_members(&self, observed: &[String]) -> Vec<String> {
        observed
            .iter()
            .filter(|host| !self.members.contains(host))
            .cloned()
            .collect()
    }
}

fn sorted(members: &[String]) -> Vec<&str> {
    let mut members = members.iter().map(String::as_str).collect::<Vec<_>>();
    members.sort_unstable();
    members
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum ReplicaSetState {
    NotInitiated,
    Initiated,
}

/// The replica set configuration as reported by `rs.conf()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicaSetObserved {
    pub name: String,
    pub members: Vec<String>,
    pub exists: bool,
}

impl ReplicaSetObserved {
    /// Builds the observed state from an `rs.conf()` document. Anything without a `members`
    /// list counts as not initiated.
    pub fn from_config(config: &Value) -> Self {
        let Some(members) = config.get("members").and_then(Value::as_array) else {
            return Self::default();
        };

        Self {
            name: config
                .get("_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            members: members
                .iter()
                .filter_map(|member| member.get("host").and_then(Value::as_str))
                .map(str::to_owned)
                .collect(),
            exists: true,
        }
    }

    pub fn state(&self) -> ReplicaSetState {
        if self.exists {
            ReplicaSetState::Initiated
        } else {
            ReplicaSetState::NotInitiated
        }
    }
}

/// Observed-state output of a replica set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplicaSetProperties {
    pub name: String,
    pub ensure: Ensure,
    pub members: Vec<String>,
    pub provider: String,
}

impl ReplicaSetProperties {
    /// Reports `observed` if it is the replica set `name`, otherwise `name` with
    /// `ensure: absent`.
    pub fn from_observed(name: &str, observed: &ReplicaSetObserved) -> Self {
        if observed.exists && observed.name == name {
            Self {
                name: observed.name.clone(),
                ensure: Ensure::Present,
                members: observed.members.clone(),
                provider: PROVIDER.to_owned(),
            }
        } else {
            Self {
                name: name.to_owned(),
                ensure: Ensure::Absent,
                members: Vec::new(),
                provider: PROVIDER.to_owned(),
            }
        }
    }
}

/// The action computed by a pass. A converged replica set produces no plan at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconciliationPlan {
    /// Initiate the set with `members`, numbered in order. `master_hint` is the first member.
    Initiate {
        members: Vec<String>,
        master_hint: String,
    },

    /// Add `to_add`, in order, through the current primary.
    AddMembers { to_add: Vec<String>, master: String },
}

/// Reads the replica set configuration of the server `shell` talks to.
pub fn observe(shell: &MongoShell) -> Result<ReplicaSetObserved, mongo_shell::Error> {
    let config = shell
        .execute(
            Call::new("rs.conf"),
            &ExecOptions::default().retries(CONFIG_RETRIES),
        )?
        .into_json();

    let observed = ReplicaSetObserved::from_config(&config);
    debug!(?observed, "observed replica set configuration");

    Ok(observed)
}

/// Returns the alive hosts which are not configured members yet, in order.
pub fn members_to_add(alive: &IndexSet<String>, current: &[String]) -> Vec<String> {
    alive
        .iter()
        .filter(|host| !current.contains(host))
        .cloned()
        .collect()
}

/// Renders `rs.initiate({_id: <name>, members: [{_id: 0, host: …}, …]})`.
pub fn initiate_command(name: &str, members: &[String]) -> Call {
    let members = members
        .iter()
        .enumerate()
        .map(|(id, host)| json!({ "_id": id, "host": host }))
        .collect::<Vec<_>>();

    Call::new("rs.initiate").document(&Document::new("_id", name).with("members", members))
}

pub fn add_command(host: &str) -> Call {
    Call::new("rs.add").arg(host)
}

/// Reconciles one declared replica set.
pub struct ReplicaSetReconciler<'a> {
    context: &'a Context,
    shell: MongoShell,
    desired: &'a ReplicaSetDesired,
}

impl<'a> ReplicaSetReconciler<'a> {
    pub fn new(context: &'a Context, desired: &'a ReplicaSetDesired) -> Self {
        let shell = match &desired.admin_credentials {
            Some(credentials) => context
                .shell()
                .clone()
                .with_credentials(Some(credentials.into())),
            None => context.shell().clone(),
        };

        Self {
            context,
            shell,
            desired,
        }
    }

    /// Runs a full pass: observe, plan, apply and observe again.
    #[instrument(skip(self), fields(replica_set = %self.desired.name))]
    pub fn reconcile(&self) -> Result<ReplicaSetProperties> {
        let observed = self.observe()?;

        let Some(plan) = self.plan(&observed)? else {
            debug!("replica set is converged");
            return Ok(ReplicaSetProperties::from_observed(
                &self.desired.name,
                &observed,
            ));
        };

        self.apply(&plan)?;

        let observed = self.observe()?;
        Ok(ReplicaSetProperties::from_observed(
            &self.desired.name,
            &observed,
        ))
    }

    pub fn observe(&self) -> Result<ReplicaSetObserved> {
        observe(&self.shell).context(ReadConfigSnafu {
            name: &self.desired.name,
        })
    }

    /// Computes the action needed to converge from `observed`, or [`None`] if there is nothing
    /// to do.
    pub fn plan(&self, observed: &ReplicaSetObserved) -> Result<Option<ReconciliationPlan>> {
        let name = &self.desired.name;

        if self.desired.ensure == Ensure::Absent {
            ensure!(
                !(observed.exists && observed.name == *name),
                UnsupportedSnafu { name }
            );
            return Ok(None);
        }

        if observed.exists {
            ensure!(
                observed.name == *name,
                ConflictingReplicaSetSnafu {
                    name,
                    host: "localhost",
                    other: &observed.name,
                }
            );

            if self.desired.members_in_sync(&observed.members) {
                return Ok(None);
            }

            let undeclared = self.desired.undeclared_members(&observed.members);
            ensure!(
                undeclared.is_empty(),
                UndeclaredMembersSnafu {
                    name,
                    members: undeclared,
                }
            );
        }

        let alive = self.alive_hosts()?;

        match observed.state() {
            ReplicaSetState::NotInitiated => {
                let master_hint = alive
                    .first()
                    .cloned()
                    .context(NoMembersDeclaredSnafu { name })?;

                Ok(Some(ReconciliationPlan::Initiate {
                    members: alive.into_iter().collect(),
                    master_hint,
                }))
            }
            ReplicaSetState::Initiated => {
                let to_add = members_to_add(&alive, &observed.members);
                if to_add.is_empty() {
                    debug!("all alive members are configured already");
                    return Ok(None);
                }

                let master =
                    find_master(&self.shell, &alive)?.context(MasterNotFoundSnafu { name })?;

                Ok(Some(ReconciliationPlan::AddMembers { to_add, master }))
            }
        }
    }

    /// Issues the commands of `plan`. Any failure aborts immediately, members added before are
    /// kept.
    pub fn apply(&self, plan: &ReconciliationPlan) -> Result<()> {
        let name = &self.desired.name;

        match plan {
            ReconciliationPlan::Initiate {
                members,
                master_hint,
            } => {
                info!(replica_set = %name, ?members, %master_hint, "Initializing the replica set");

                let response = self
                    .shell
                    .execute(initiate_command(name, members), &ExecOptions::default())
                    .context(InitiateSnafu { name })?
                    .into_json();
                ensure_ok(&response).context(InitiateSnafu { name })
            }
            ReconciliationPlan::AddMembers { to_add, master } => {
                for host in to_add {
                    info!(replica_set = %name, %host, %master, "Adding member to the replica set");

                    let response = self
                        .shell
                        .execute(add_command(host), &ExecOptions::default().host(master))
                        .context(AddMemberSnafu { name, host })?
                        .into_json();
                    ensure_ok(&response).context(AddMemberSnafu { name, host })?;
                }

                Ok(())
            }
        }
    }

    /// Returns the declared members which can be configured.
    ///
    /// With authorization enabled, unauthenticated status queries can't tell a dead host from
    /// a rejected session, so all declared members are trusted to be alive.
    fn alive_hosts(&self) -> Result<IndexSet<String>> {
        let members = &self.desired.members;
        if members.is_empty() {
            return Ok(IndexSet::new());
        }

        if self.context.authorization_enabled().context(ProbeSnafu)? {
            debug!(?members, "authorization enabled, assuming all members alive");
            return Ok(members.iter().cloned().collect());
        }

        let Partition { alive, dead } = partition(&self.shell, &self.desired.name, members)?;
        ensure!(
            !alive.is_empty(),
            NoReachableMembersSnafu {
                name: &self.desired.name
            }
        );

        debug!(?alive, "alive members");
        if !dead.is_empty() {
            debug!(?dead, "dead members");
        }

        Ok(alive)
    }
}
