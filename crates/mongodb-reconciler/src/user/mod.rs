//! Account reconciliation.
//!
//! Accounts are enumerated fresh for every pass, matched against the declared account by
//! username and database, and converged with the commands of the server's [`Dialect`].

use mongo_shell::{Call, ExecOptions, MongoShell, ensure_ok};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, instrument};

use crate::{context::Context, ensure::Ensure, probe};

mod dialect;
mod role;

pub use dialect::*;
pub use role::*;

/// Enumerating `system.users` may hit a secondary which has not caught up yet.
const ENUMERATION_RETRIES: u32 = 5;

const DEFAULT_DATABASE: &str = "admin";
const LIST_DATABASES_SCRIPT: &str =
    r#"db.getMongo().getDBs()["databases"].map(function(db){return db["name"]})"#;
const LIST_USERS_SCRIPT: &str = "db.system.users.find().toArray()";
const LEGACY_CREDENTIALS_MECHANISM: &str = "MONGODB-CR";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to probe the server"))]
    Probe { source: probe::Error },

    #[snafu(display("failed to list databases"))]
    ListDatabases { source: mongo_shell::Error },

    #[snafu(display("failed to list the users of database {database}"))]
    ListUsers {
        source: mongo_shell::Error,
        database: String,
    },

    #[snafu(display("failed to create user {username} on database {database}"))]
    CreateUser {
        source: mongo_shell::Error,
        username: String,
        database: String,
    },

    #[snafu(display("failed to drop user {username} from database {database}"))]
    DropUser {
        source: mongo_shell::Error,
        username: String,
        database: String,
    },

    #[snafu(display("failed to update the password of user {username} on database {database}"))]
    UpdatePassword {
        source: mongo_shell::Error,
        username: String,
        database: String,
    },

    #[snafu(display("failed to update the roles of user {username} on database {database}"))]
    UpdateRoles {
        source: mongo_shell::Error,
        username: String,
        database: String,
    },
}

/// An account as stored in `system.users`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub database: String,

    /// Sorted role identifiers, see [`Role`].
    pub roles: Vec<String>,
    pub password_hash: Option<String>,
}

impl Account {
    /// Reads a `system.users` document. `database` is only used if the document does not name
    /// its own database, which is the case on legacy servers.
    pub fn from_document(document: &Value, database: &str) -> Option<Self> {
        let username = document.get("user").and_then(Value::as_str)?;
        let database = document
            .get("db")
            .and_then(Value::as_str)
            .unwrap_or(database);

        let roles = document
            .get("roles")
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(|role| Role::from_stored(role, database))
                    .map(|role| role.to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let password_hash = document
            .get("credentials")
            .and_then(|credentials| credentials.get(LEGACY_CREDENTIALS_MECHANISM))
            .or_else(|| document.get("pwd"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let id = match document.get("_id") {
            Some(Value::String(id)) => id.clone(),
            Some(id) => id.to_string(),
            None => format!("{database}.{username}"),
        };

        Some(Self {
            id,
            username: username.to_owned(),
            database: database.to_owned(),
            roles: normalize_roles(roles),
            password_hash,
        })
    }
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_owned()
}

/// The declared state of an account.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDesired {
    pub name: String,

    #[serde(default)]
    pub ensure: Ensure,

    pub username: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Role identifiers, `role` for the account database or `role@db` for any other.
    #[serde(default)]
    pub roles: Vec<String>,

    pub password_hash: String,
}

impl AccountDesired {
    pub fn matches(&self, account: &Account) -> bool {
        self.username == account.username && self.database == account.database
    }

    /// Declared roles in the form they are read back from the server, sorted.
    pub fn sorted_roles(&self) -> Vec<String> {
        normalize_roles(self.roles.iter().map(|role| {
            let Ok(role) = role.parse::<Role>();
            role.relative_to(&self.database).to_string()
        }))
    }
}

/// Observed-state output of an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProperties {
    pub name: String,
    pub ensure: Ensure,
    pub username: String,
    pub database: String,
    pub roles: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

impl AccountProperties {
    pub fn from_account(name: &str, account: &Account) -> Self {
        Self {
            name: name.to_owned(),
            ensure: Ensure::Present,
            username: account.username.clone(),
            database: account.database.clone(),
            roles: account.roles.clone(),
            password_hash: account.password_hash.clone(),
        }
    }

    pub fn absent(desired: &AccountDesired) -> Self {
        Self {
            name: desired.name.clone(),
            ensure: Ensure::Absent,
            username: desired.username.clone(),
            database: desired.database.clone(),
            roles: Vec::new(),
            password_hash: None,
        }
    }
}

/// A single change to converge an account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountChange {
    Create,
    Drop,
    UpdatePassword,

    /// Replaces the whole role list, legacy servers only.
    SetRoles(Vec<String>),
    GrantRoles(Vec<String>),
    RevokeRoles(Vec<String>),
}

/// Lists all accounts known to the server.
///
/// Legacy servers keep users per database, so every database is queried on its own. Modern
/// servers keep all users in `admin.system.users`.
#[instrument(skip_all)]
pub fn enumerate_accounts(shell: &MongoShell, dialect: Dialect) -> Result<Vec<Account>> {
    let databases = match dialect {
        Dialect::Legacy => list_databases(shell)?,
        Dialect::Modern => vec![DEFAULT_DATABASE.to_owned()],
    };

    let mut accounts = Vec::new();
    for database in &databases {
        let users = shell
            .execute(
                LIST_USERS_SCRIPT,
                &ExecOptions::default()
                    .db(database)
                    .retries(ENUMERATION_RETRIES),
            )
            .context(ListUsersSnafu { database })?
            .into_json();

        accounts.extend(
            users
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|user| Account::from_document(user, database)),
        );
    }

    debug!(count = accounts.len(), %dialect, "enumerated accounts");
    Ok(accounts)
}

fn list_databases(shell: &MongoShell) -> Result<Vec<String>> {
    let names = shell
        .execute(LIST_DATABASES_SCRIPT, &ExecOptions::default())
        .context(ListDatabasesSnafu)?
        .into_json();

    let databases = names
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect::<Vec<_>>();

    if databases.is_empty() {
        Ok(vec![default_database()])
    } else {
        Ok(databases)
    }
}

/// Computes the changes needed to get from `observed` to `desired`.
pub fn plan(
    desired: &AccountDesired,
    observed: Option<&Account>,
    dialect: Dialect,
) -> Vec<AccountChange> {
    let observed = match (desired.ensure, observed) {
        (Ensure::Absent, Some(_)) => return vec![AccountChange::Drop],
        (Ensure::Absent, None) => return Vec::new(),
        (Ensure::Present, None) => return vec![AccountChange::Create],
        (Ensure::Present, Some(observed)) => observed,
    };

    let mut changes = Vec::new();

    if observed.password_hash.as_deref() != Some(desired.password_hash.as_str()) {
        changes.push(AccountChange::UpdatePassword);
    }

    let desired_roles = desired.sorted_roles();
    if desired_roles != observed.roles {
        match dialect {
            Dialect::Legacy => changes.push(AccountChange::SetRoles(desired_roles)),
            Dialect::Modern => {
                let grant = difference(&desired_roles, &observed.roles);
                if !grant.is_empty() {
                    changes.push(AccountChange::GrantRoles(grant));
                }

                let revoke = difference(&observed.roles, &desired_roles);
                if !revoke.is_empty() {
                    changes.push(AccountChange::RevokeRoles(revoke));
                }
            }
        }
    }

    changes
}

fn difference(left: &[String], right: &[String]) -> Vec<String> {
    left.iter()
        .filter(|role| !right.contains(role))
        .cloned()
        .collect()
}

/// Fails if a structured response carries a failed `ok` field. Shell helpers without a status
/// document, such as `grantRolesToUser`, throw on failure instead.
fn check_response(response: &Value) -> Result<(), mongo_shell::Error> {
    if response.get("ok").is_some() {
        ensure_ok(response)
    } else {
        Ok(())
    }
}

/// Reconciles one declared account.
pub struct UserReconciler<'a> {
    context: &'a Context,
    desired: &'a AccountDesired,
}

impl<'a> UserReconciler<'a> {
    pub fn new(context: &'a Context, desired: &'a AccountDesired) -> Self {
        Self { context, desired }
    }

    #[instrument(skip(self), fields(username = %self.desired.username, database = %self.desired.database))]
    pub fn reconcile(&self) -> Result<AccountProperties> {
        let dialect = self.dialect()?;

        let observed = self.observe(dialect)?;
        let changes = plan(self.desired, observed.as_ref(), dialect);
        if changes.is_empty() {
            debug!("account is converged");
            return Ok(self.properties(observed.as_ref()));
        }

        self.apply(dialect, &changes)?;

        let observed = self.observe(dialect)?;
        Ok(self.properties(observed.as_ref()))
    }

    pub fn dialect(&self) -> Result<Dialect> {
        Ok(Dialect::new(self.context.is_legacy().context(ProbeSnafu)?))
    }

    pub fn observe(&self, dialect: Dialect) -> Result<Option<Account>> {
        let accounts = enumerate_accounts(self.context.shell(), dialect)?;
        Ok(accounts
            .into_iter()
            .find(|account| self.desired.matches(account)))
    }

    /// Issues `changes` in order, stopping at the first failure.
    pub fn apply(&self, dialect: Dialect, changes: &[AccountChange]) -> Result<()> {
        let AccountDesired {
            name,
            username,
            database,
            password_hash,
            ..
        } = self.desired;

        for change in changes {
            match change {
                AccountChange::Create => {
                    info!(%username, %database, "Creating user");
                    let created_by = format!("mongodb-reconciler account {name}");
                    let roles = self.desired.sorted_roles();
                    self.run(dialect.create(username, password_hash, &roles, &created_by))
                        .context(CreateUserSnafu { username, database })?;
                }
                AccountChange::Drop => {
                    info!(%username, %database, "Dropping user");
                    self.run(dialect.drop(username))
                        .context(DropUserSnafu { username, database })?;
                }
                AccountChange::UpdatePassword => {
                    info!(%username, %database, "Updating password");
                    self.run(dialect.update_password(username, password_hash))
                        .context(UpdatePasswordSnafu { username, database })?;
                }
                AccountChange::SetRoles(roles) => {
                    info!(%username, %database, ?roles, "Replacing roles");
                    self.run(Dialect::set_roles(username, roles))
                        .context(UpdateRolesSnafu { username, database })?;
                }
                AccountChange::GrantRoles(roles) => {
                    info!(%username, %database, ?roles, "Granting roles");
                    self.run(Dialect::grant_roles(database, username, roles))
                        .context(UpdateRolesSnafu { username, database })?;
                }
                AccountChange::RevokeRoles(roles) => {
                    info!(%username, %database, ?roles, "Revoking roles");
                    self.run(Dialect::revoke_roles(database, username, roles))
                        .context(UpdateRolesSnafu { username, database })?;
                }
            }
        }

        Ok(())
    }

    fn run(&self, call: Call) -> Result<(), mongo_shell::Error> {
        let response = self
            .context
            .shell()
            .execute(call, &ExecOptions::default().db(&self.desired.database))?
            .into_json();
        check_response(&response)
    }

    fn properties(&self, observed: Option<&Account>) -> AccountProperties {
        match observed {
            Some(account) => AccountProperties::from_account(&self.desired.name, account),
            None => AccountProperties::absent(self.desired),
        }
    }
}
