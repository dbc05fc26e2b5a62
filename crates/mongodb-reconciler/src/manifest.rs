//! The desired-state manifest.
//!
//! ```yaml
//! replicaSets:
//!   - name: rs0
//!     members: ["db1:27017", "db2:27017", "db3:27017"]
//! users:
//!   - name: app-alice
//!     username: alice
//!     database: app
//!     passwordHash: 0123abcd
//!     roles: [readWrite, read@reporting]
//! ```

use std::{
    collections::HashSet,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

use crate::{replset::ReplicaSetDesired, user::AccountDesired};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "failed to locate a required file in any of the following locations: {search_path:?}"
    ))]
    RequiredFileMissing { search_path: Vec<PathBuf> },

    #[snafu(display("failed to read manifest {path:?}"))]
    ReadManifest {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse manifest {path:?}"))]
    ParseManifest {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("replica set {name} is declared more than once"))]
    DuplicateReplicaSet { name: String },

    #[snafu(display("user {username} on database {database} is declared more than once"))]
    DuplicateUser { username: String, database: String },

    #[snafu(display("replica set {name} declares member {member} more than once"))]
    DuplicateMember { name: String, member: String },
}

/// All declared resources, reconciled in declaration order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub replica_sets: Vec<ReplicaSetDesired>,

    #[serde(default)]
    pub users: Vec<AccountDesired>,
}

impl Manifest {
    pub fn from_yaml_str(path: &Path, contents: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(contents).context(ParseManifestSnafu { path })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).context(ReadManifestSnafu { path })?;
        Self::from_yaml_str(path, &contents)
    }

    /// Rejects declarations which would make two resources fight over the same object.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for replica_set in &self.replica_sets {
            ensure!(
                names.insert(replica_set.name.as_str()),
                DuplicateReplicaSetSnafu {
                    name: &replica_set.name
                }
            );

            let mut members = HashSet::new();
            for member in &replica_set.members {
                ensure!(
                    members.insert(member.as_str()),
                    DuplicateMemberSnafu {
                        name: &replica_set.name,
                        member,
                    }
                );
            }
        }

        let mut accounts = HashSet::new();
        for user in &self.users {
            ensure!(
                accounts.insert((user.username.as_str(), user.database.as_str())),
                DuplicateUserSnafu {
                    username: &user.username,
                    database: &user.database,
                }
            );
        }

        Ok(())
    }
}

/// A path to a [`Manifest`] file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestPath {
    path: Option<PathBuf>,
}

impl From<&OsStr> for ManifestPath {
    fn from(s: &OsStr) -> Self {
        Self {
            // clap doesn't let us hook in to see the underlying `Option<&str>`, so we treat the
            // otherwise-invalid `""` as a sentinel for using the default instead.
            path: if s.is_empty() { None } else { Some(s.into()) },
        }
    }
}

impl ManifestPath {
    /// Load the [`Manifest`] from the given path, falling back to the first path that exists
    /// from `default_search_paths` if none is given by the user.
    pub fn load(&self, default_search_paths: &[impl AsRef<Path>]) -> Result<Manifest> {
        let resolved_path = Self::resolve_path(self.path.as_deref(), default_search_paths)?;
        Manifest::from_yaml_file(resolved_path)
    }

    /// Check if the path can be found anywhere
    ///
    /// 1. User provides path `user_provided_path` to file. Return [`Error`] if not existing.
    /// 2. User does not provide path to file -> search in `default_paths` and
    ///    take the first existing file.
    /// 3. Return [`Error`] if nothing was found.
    fn resolve_path<'a>(
        user_provided_path: Option<&'a Path>,
        default_paths: &'a [impl AsRef<Path> + 'a],
    ) -> Result<&'a Path> {
        // Use override if specified by the user, otherwise search through defaults given
        let search_paths = if let Some(path) = user_provided_path {
            vec![path]
        } else {
            default_paths.iter().map(|path| path.as_ref()).collect()
        };
        for path in &search_paths {
            if path.exists() {
                return Ok(path);
            }
        }
        RequiredFileMissingSnafu {
            search_path: search_paths
                .into_iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>(),
        }
        .fail()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use indoc::indoc;
    use rstest::*;
    use tempfile::tempdir;

    use super::*;
    use crate::ensure::Ensure;

    const USER_PROVIDED_PATH: &str = "user_provided_manifest.yaml";
    const LOCAL_FILE_PATH: &str = "manifest.yaml";
    const DEFAULT_FILE_PATH: &str = "default_manifest.yaml";

    #[rstest]
    #[case(
        Some(USER_PROVIDED_PATH),
        vec![],
        USER_PROVIDED_PATH,
        USER_PROVIDED_PATH
    )]
    #[case(
        None,
        vec![LOCAL_FILE_PATH, DEFAULT_FILE_PATH],
        LOCAL_FILE_PATH,
        LOCAL_FILE_PATH
    )]
    #[case(None, vec!["bad", DEFAULT_FILE_PATH], DEFAULT_FILE_PATH, DEFAULT_FILE_PATH)]
    fn resolve_path_good(
        #[case] user_provided_path: Option<&str>,
        #[case] default_locations: Vec<&str>,
        #[case] path_to_create: &str,
        #[case] expected: &str,
    ) -> Result<()> {
        let temp_dir = tempdir().expect("create temporary directory");
        let full_path_to_create = temp_dir.path().join(path_to_create);
        let full_user_provided_path = user_provided_path.map(|p| temp_dir.path().join(p));
        let expected_path = temp_dir.path().join(expected);

        let full_default_locations = default_locations
            .iter()
            .map(|loc| temp_dir.path().join(loc))
            .collect::<Vec<_>>();

        let file = File::create(full_path_to_create).expect("create temporary file");

        let found_path = ManifestPath::resolve_path(
            full_user_provided_path.as_deref(),
            &full_default_locations,
        )?;

        assert_eq!(found_path, expected_path);

        drop(file);
        temp_dir.close().expect("clean up temporary directory");

        Ok(())
    }

    #[test]
    fn resolve_path_user_path_not_existing() {
        let error = ManifestPath::resolve_path(
            Some(USER_PROVIDED_PATH.as_ref()),
            &[LOCAL_FILE_PATH],
        )
        .expect_err("the user provided path does not exist");

        assert!(matches!(
            error,
            Error::RequiredFileMissing { search_path } if search_path == [PathBuf::from(USER_PROVIDED_PATH)]
        ));
    }

    #[test]
    fn resolve_path_nothing_found() {
        let error = ManifestPath::resolve_path(None, &[LOCAL_FILE_PATH, DEFAULT_FILE_PATH])
            .expect_err("none of the default paths exist");

        assert!(matches!(
            error,
            Error::RequiredFileMissing { search_path } if search_path.len() == 2
        ));
    }

    #[test]
    fn empty_argument_means_default() {
        assert_eq!(ManifestPath::from(OsStr::new("")), ManifestPath { path: None });
        assert_eq!(
            ManifestPath::from(OsStr::new("/etc/mongodb/manifest.yaml")),
            ManifestPath {
                path: Some(PathBuf::from("/etc/mongodb/manifest.yaml"))
            }
        );
    }

    #[test]
    fn parses_a_full_manifest() {
        let manifest = Manifest::from_yaml_str(
            Path::new("manifest.yaml"),
            indoc! {r#"
                replicaSets:
                  - name: rs0
                    members: ["db1:27017", "db2:27017"]
                    adminCredentials:
                      username: admin
                      password: secret
                  - name: rs1
                    ensure: absent
                users:
                  - name: app-alice
                    username: alice
                    database: app
                    passwordHash: 0123abcd
                    roles: [readWrite, read@reporting]
                  - name: root
                    username: root
                    passwordHash: ffff
            "#},
        )
        .expect("manifest is valid");

        assert_eq!(manifest.replica_sets.len(), 2);
        assert_eq!(manifest.replica_sets[0].members, ["db1:27017", "db2:27017"]);
        assert!(manifest.replica_sets[0].admin_credentials.is_some());
        assert_eq!(manifest.replica_sets[1].ensure, Ensure::Absent);
        assert!(manifest.replica_sets[1].members.is_empty());

        assert_eq!(manifest.users[0].roles, ["readWrite", "read@reporting"]);
        assert_eq!(manifest.users[1].database, "admin");
        assert_eq!(manifest.users[1].ensure, Ensure::Present);
    }

    #[rstest]
    #[case::replica_set(
        indoc! {"
            replicaSets:
              - name: rs0
              - name: rs0
        "},
        "replica set rs0 is declared more than once"
    )]
    #[case::member(
        indoc! {r#"
            replicaSets:
              - name: rs0
                members: ["db1:27017", "db1:27017"]
        "#},
        "replica set rs0 declares member db1:27017 more than once"
    )]
    #[case::user(
        indoc! {"
            users:
              - name: a
                username: alice
                passwordHash: x
              - name: b
                username: alice
                database: admin
                passwordHash: y
        "},
        "user alice on database admin is declared more than once"
    )]
    fn rejects_duplicates(#[case] contents: &str, #[case] expected: &str) {
        let error = Manifest::from_yaml_str(Path::new("manifest.yaml"), contents)
            .expect_err("manifest is invalid");
        assert_eq!(error.to_string(), expected);
    }

    #[test]
    fn rejects_unknown_ensure_values() {
        let error = Manifest::from_yaml_str(
            Path::new("manifest.yaml"),
            "replicaSets: [{name: rs0, ensure: purged}]",
        )
        .expect_err("ensure value is unknown");
        assert!(matches!(error, Error::ParseManifest { .. }));
    }
}
