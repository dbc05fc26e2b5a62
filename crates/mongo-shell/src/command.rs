use std::{
    fmt::{self, Display},
    sync::LazyLock,
};

use regex::Regex;
use serde_json::Value;

static BARE_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("failed to compile bare key regex")
});

/// An ordered mongo shell object literal, e.g. `{createUser:"alice",pwd:"…"}`.
///
/// Some server commands identify themselves by their *first* field (`createUser`, `updateUser`),
/// which a plain JSON object cannot guarantee. A [`Document`] therefore always starts with the
/// field passed to [`Document::new`] and keeps every following field in insertion order. Values
/// are rendered as JSON, so strings are always quoted and escaped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates a document whose leading field is `key`.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            fields: vec![(key.into(), value.into())],
        }
    }

    /// Appends a field. An already present key keeps its position and gets the new value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(existing, value)| (existing == key).then_some(value))
    }

    /// Returns the field names in rendering order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(key, _)| key.as_str())
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;

        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }

            if BARE_KEY_REGEX.is_match(key) {
                write!(f, "{key}:{value}")?;
            } else {
                write!(f, "{}:{value}", Value::from(key.as_str()))?;
            }
        }

        f.write_str("}")
    }
}

/// A mongo shell function call such as `rs.add("db3:27017")`.
///
/// Arguments are rendered when they are added. Calls can be chained with [`Call::then`] to
/// address methods on the result of a previous call, which is needed for
/// `db.getSiblingDB("app").grantRolesToUser(…)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    target: String,
    arguments: Vec<String>,
}

impl Call {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            target: function.into(),
            arguments: Vec::new(),
        }
    }

    /// Adds a JSON-encoded argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.arguments.push(value.into().to_string());
        self
    }

    /// Adds an ordered [`Document`] argument.
    pub fn document(mut self, document: &Document) -> Self {
        self.arguments.push(document.to_string());
        self
    }

    /// Calls `method` on the value returned by this call.
    pub fn then(self, method: &str) -> Self {
        Self::new(format!("{self}.{method}"))
    }
}

impl Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.target, self.arguments.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn create_user_comes_first() {
        let document = Document::new("createUser", "alice")
            .with("pwd", "0123abcd")
            .with("digestPassword", false)
            .with("customData", json!({"createdBy": "mongodb-reconciler"}))
            .with("roles", json!(["readWrite"]));

        assert_eq!(document.keys().next(), Some("createUser"));
        assert_eq!(
            document.to_string(),
            r#"{createUser:"alice",pwd:"0123abcd",digestPassword:false,customData:{"createdBy":"mongodb-reconciler"},roles:["readWrite"]}"#
        );
    }

    #[test]
    fn replacing_a_field_keeps_its_position() {
        let document = Document::new("updateUser", "alice")
            .with("pwd", "old")
            .with("digestPassword", false)
            .with("pwd", "new");

        assert_eq!(
            document.keys().collect::<Vec<_>>(),
            ["updateUser", "pwd", "digestPassword"]
        );
        assert_eq!(document.get("pwd"), Some(&json!("new")));
    }

    #[test]
    fn odd_keys_are_quoted() {
        let document = Document::new("$set", json!({"pwd": "x"})).with("a-b", 1);
        assert_eq!(document.to_string(), r#"{$set:{"pwd":"x"},"a-b":1}"#);
    }

    #[test]
    fn call_arguments_are_escaped() {
        let call = Call::new("db.dropUser").arg(r#"eve"); db.dropDatabase(); ("#);
        assert_eq!(
            call.to_string(),
            r#"db.dropUser("eve\"); db.dropDatabase(); (")"#
        );
    }

    #[test]
    fn chained_calls() {
        let call = Call::new("db.getSiblingDB")
            .arg("app")
            .then("grantRolesToUser")
            .arg("alice")
            .arg(json!(["read", {"role": "readWrite", "db": "other"}]));

        assert_eq!(
            call.to_string(),
            r#"db.getSiblingDB("app").grantRolesToUser("alice", ["read",{"db":"other","role":"readWrite"}])"#
        );
    }

    #[test]
    fn call_without_arguments() {
        assert_eq!(Call::new("rs.status").to_string(), "rs.status()");
    }
}
