use mongo_shell::{Call, Document};
use serde_json::{Value, json};

use crate::user::role::command_roles;

/// The account management commands understood by a server generation.
///
/// 2.4 servers only know `addUser`/`removeUser` and direct writes to `system.users`. Later
/// servers have dedicated user management commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Dialect {
    Legacy,
    Modern,
}

impl Dialect {
    pub fn new(legacy: bool) -> Self {
        if legacy { Self::Legacy } else { Self::Modern }
    }

    pub fn create(
        self,
        username: &str,
        password_hash: &str,
        roles: &[String],
        created_by: &str,
    ) -> Call {
        match self {
            Self::Legacy => Call::new("db.addUser").document(
                &Document::new("user", username)
                    .with("pwd", password_hash)
                    .with("roles", roles),
            ),
            Self::Modern => Call::new("db.runCommand").document(
                &Document::new("createUser", username)
                    .with("pwd", password_hash)
                    .with("digestPassword", false)
                    .with("customData", json!({ "createdBy": created_by }))
                    .with("roles", command_roles(roles)),
            ),
        }
    }

    pub fn drop(self, username: &str) -> Call {
        match self {
            Self::Legacy => Call::new("db.removeUser").arg(username),
            Self::Modern => Call::new("db.dropUser").arg(username),
        }
    }

    pub fn update_password(self, username: &str, password_hash: &str) -> Call {
        match self {
            Self::Legacy => update_system_user(username, "pwd", password_hash.into()),
            Self::Modern => Call::new("db.runCommand").document(
                &Document::new("updateUser", username)
                    .with("pwd", password_hash)
                    .with("digestPassword", false),
            ),
        }
    }

    /// Replaces the whole role list. Only legacy servers support this.
    pub fn set_roles(username: &str, roles: &[String]) -> Call {
        update_system_user(username, "roles", roles.into())
    }

    pub fn grant_roles(database: &str, username: &str, roles: &[String]) -> Call {
        sibling_db(database)
            .then("grantRolesToUser")
            .arg(username)
            .arg(command_roles(roles))
    }

    pub fn revoke_roles(database: &str, username: &str, roles: &[String]) -> Call {
        sibling_db(database)
            .then("revokeRolesFromUser")
            .arg(username)
            .arg(command_roles(roles))
    }
}

fn update_system_user(username: &str, field: &str, value: Value) -> Call {
    Call::new("db.system.users.update")
        .document(&Document::new("user", username))
        .document(&Document::new(
            "$set",
            Value::Object([(field.to_owned(), value)].into_iter().collect()),
        ))
}

fn sibling_db(database: &str) -> Call {
    Call::new("db.getSiblingDB").arg(database)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(roles: &[&str]) -> Vec<String> {
        roles.iter().map(|role| (*role).to_owned()).collect()
    }

    #[test]
    fn modern_create_starts_with_create_user() {
        let call = Dialect::Modern.create(
            "alice",
            "0123abcd",
            &roles(&["readWrite", "read@reporting"]),
            "mongodb-reconciler account alice",
        );

        assert_eq!(
            call.to_string(),
            r#"db.runCommand({createUser:"alice",pwd:"0123abcd",digestPassword:false,customData:{"createdBy":"mongodb-reconciler account alice"},roles:["readWrite",{"db":"reporting","role":"read"}]})"#
        );
    }

    #[test]
    fn legacy_create_uses_add_user() {
        let call = Dialect::Legacy.create("alice", "0123abcd", &roles(&["readWrite"]), "ignored");

        assert_eq!(
            call.to_string(),
            r#"db.addUser({user:"alice",pwd:"0123abcd",roles:["readWrite"]})"#
        );
    }

    #[test]
    fn drop_by_generation() {
        assert_eq!(Dialect::Legacy.drop("alice").to_string(), r#"db.removeUser("alice")"#);
        assert_eq!(Dialect::Modern.drop("alice").to_string(), r#"db.dropUser("alice")"#);
    }

    #[test]
    fn password_updates() {
        assert_eq!(
            Dialect::Modern.update_password("alice", "ffff").to_string(),
            r#"db.runCommand({updateUser:"alice",pwd:"ffff",digestPassword:false})"#
        );
        assert_eq!(
            Dialect::Legacy.update_password("alice", "ffff").to_string(),
            r#"db.system.users.update({user:"alice"}, {$set:{"pwd":"ffff"}})"#
        );
    }

    #[test]
    fn role_updates() {
        assert_eq!(
            Dialect::set_roles("alice", &roles(&["read", "readWrite"])).to_string(),
            r#"db.system.users.update({user:"alice"}, {$set:{"roles":["read","readWrite"]}})"#
        );
        assert_eq!(
            Dialect::grant_roles("app", "alice", &roles(&["readWrite@other"])).to_string(),
            r#"db.getSiblingDB("app").grantRolesToUser("alice", [{"db":"other","role":"readWrite"}])"#
        );
        assert_eq!(
            Dialect::revoke_roles("app", "alice", &roles(&["dbAdmin"])).to_string(),
            r#"db.getSiblingDB("app").revokeRolesFromUser("alice", ["dbAdmin"])"#
        );
    }
}
