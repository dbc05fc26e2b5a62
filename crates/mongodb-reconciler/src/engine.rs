//! Drives the reconcilers over a [`Manifest`].

use mongo_shell::MongoShell;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing::{error, info, instrument};

use crate::{
    context::Context,
    manifest::Manifest,
    probe,
    replset::{self, ReplicaSetProperties, ReplicaSetReconciler},
    user::{self, AccountProperties, Dialect, UserReconciler},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to observe replica set {name}"))]
    ObserveReplicaSet {
        source: replset::Error,
        name: String,
    },

    #[snafu(display("failed to probe the server"))]
    Probe { source: probe::Error },

    #[snafu(display("failed to enumerate users"))]
    EnumerateUsers { source: user::Error },
}

/// A resource which failed to converge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub resource: String,

    /// The full error chain.
    pub error: String,
}

/// Outcome of a reconciliation pass over a whole manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub replica_sets: Vec<ReplicaSetProperties>,
    pub users: Vec<AccountProperties>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<Failure>,
}

impl PassReport {
    pub fn is_converged(&self) -> bool {
        self.failures.is_empty()
    }

    fn record<T, E>(&mut self, resource: String, result: Result<T, E>) -> Option<T>
    where
        E: std::error::Error + 'static,
    {
        match result {
            Ok(properties) => {
                info!(%resource, "resource converged");
                Some(properties)
            }
            Err(err) => {
                let error = snafu::Report::from_error(err).to_string();
                error!(%resource, %error, "resource failed to converge");
                self.failures.push(Failure { resource, error });
                None
            }
        }
    }
}

/// Observed state of everything the reconciler knows about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedState {
    pub replica_sets: Vec<ReplicaSetProperties>,
    pub users: Vec<AccountProperties>,
}

pub struct Engine {
    context: Context,
}

impl Engine {
    pub fn new(shell: MongoShell) -> Self {
        Self {
            context: Context::new(shell),
        }
    }

    /// Reconciles every declared resource in declaration order, replica sets first.
    ///
    /// A failing resource is recorded in the report and does not stop its siblings.
    #[instrument(skip_all)]
    pub fn run(&self, manifest: &Manifest) -> PassReport {
        let mut report = PassReport::default();

        for desired in &manifest.replica_sets {
            let result = ReplicaSetReconciler::new(&self.context, desired).reconcile();
            if let Some(properties) =
                report.record(format!("replica set {}", desired.name), result)
            {
                report.replica_sets.push(properties);
            }
        }

        for desired in &manifest.users {
            let result = UserReconciler::new(&self.context, desired).reconcile();
            if let Some(properties) = report.record(
                format!("user {} on database {}", desired.username, desired.database),
                result,
            ) {
                report.users.push(properties);
            }
        }

        report
    }

    /// Observes the declared replica sets and lists all existing users, without changing
    /// anything.
    pub fn show(&self, manifest: &Manifest) -> Result<ObservedState> {
        let replica_sets = manifest
            .replica_sets
            .iter()
            .map(|desired| {
                let observed = ReplicaSetReconciler::new(&self.context, desired)
                    .observe()
                    .context(ObserveReplicaSetSnafu {
                        name: &desired.name,
                    })?;
                Ok(ReplicaSetProperties::from_observed(&desired.name, &observed))
            })
            .collect::<Result<Vec<_>>>()?;

        let dialect = Dialect::new(self.context.is_legacy().context(ProbeSnafu)?);
        let users = user::enumerate_accounts(self.context.shell(), dialect)
            .context(EnumerateUsersSnafu)?
            .iter()
            .map(|account| AccountProperties::from_account(&account.id, account))
            .collect();

        Ok(ObservedState {
            replica_sets,
            users,
        })
    }
}
