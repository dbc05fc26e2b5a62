use std::{convert::Infallible, fmt::Display, str::FromStr};

use serde_json::{Value, json};

/// A role granted to an account.
///
/// Roles on the account's own database are written as plain names (`readWrite`), roles on other
/// databases as `readWrite@reporting`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Role {
    pub name: String,
    pub db: Option<String>,
}

impl Role {
    /// Reads a role as stored in `system.users`.
    ///
    /// Modern servers store `{role, db}` documents, the role is shortened to its name if `db` is
    /// the account database. Legacy servers store plain names.
    pub fn from_stored(stored: &Value, account_db: &str) -> Option<Self> {
        match stored {
            Value::String(name) => Some(Self {
                name: name.clone(),
                db: None,
            }),
            Value::Object(document) => {
                let name = document.get("role").and_then(Value::as_str)?;
                let db = document
                    .get("db")
                    .and_then(Value::as_str)
                    .filter(|db| *db != account_db);

                Some(Self {
                    name: name.to_owned(),
                    db: db.map(str::to_owned),
                })
            }
            _ => None,
        }
    }

    /// Drops `db` if it names the account database, so `readWrite@app` and `readWrite` compare
    /// equal for an account on `app`.
    pub fn relative_to(mut self, account_db: &str) -> Self {
        if self.db.as_deref() == Some(account_db) {
            self.db = None;
        }
        self
    }

    /// Renders the role for the modern user management commands.
    pub fn to_command_value(&self) -> Value {
        match &self.db {
            Some(db) => json!({ "role": self.name, "db": db }),
            None => Value::from(self.name.as_str()),
        }
    }
}

impl FromStr for Role {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('@') {
            Some((name, db)) => Self {
                name: name.to_owned(),
                db: Some(db.to_owned()),
            },
            None => Self {
                name: s.to_owned(),
                db: None,
            },
        })
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.db {
            Some(db) => write!(f, "{}@{db}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Renders role identifiers for the modern user management commands.
pub fn command_roles<S: AsRef<str>>(roles: &[S]) -> Value {
    roles
        .iter()
        .map(|role| {
            let Ok(role) = role.as_ref().parse::<Role>();
            role.to_command_value()
        })
        .collect()
}

/// Returns `roles` sorted and without duplicates.
pub fn normalize_roles<I>(roles: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut roles = roles.into_iter().map(Into::into).collect::<Vec<_>>();
    roles.sort_unstable();
    roles.dedup();
    roles
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(json!({"role": "readWrite", "db": "app"}), "readWrite")]
    #[case(json!({"role": "readWrite", "db": "other"}), "readWrite@other")]
    #[case(json!("dbAdmin"), "dbAdmin")]
    fn stored_roles_are_shortened_to_the_account_database(
        #[case] stored: Value,
        #[case] expected: &str,
    ) {
        let role = Role::from_stored(&stored, "app").expect("role is readable");
        assert_eq!(role.to_string(), expected);
    }

    #[test]
    fn malformed_stored_roles_are_skipped() {
        assert_eq!(Role::from_stored(&json!({"db": "app"}), "app"), None);
        assert_eq!(Role::from_stored(&json!(1), "app"), None);
    }

    #[test]
    fn roles_on_other_databases_become_documents() {
        assert_eq!(
            command_roles(&["readWrite@other", "readWrite"]),
            json!([{"role": "readWrite", "db": "other"}, "readWrite"])
        );
    }

    #[rstest]
    #[case("readWrite@app", "readWrite")]
    #[case("readWrite@other", "readWrite@other")]
    #[case("readWrite", "readWrite")]
    fn roles_on_the_account_database_are_shortened(#[case] role: &str, #[case] expected: &str) {
        let Ok(role) = role.parse::<Role>();
        assert_eq!(role.relative_to("app").to_string(), expected);
    }

    #[test]
    fn normalized_roles_are_order_independent() {
        assert_eq!(
            normalize_roles(["readWrite", "dbAdmin", "readWrite"]),
            normalize_roles(["dbAdmin", "readWrite"])
        );
    }
}
