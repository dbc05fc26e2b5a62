//! This library runs administrative scripts against MongoDB servers by shelling out to the `mongo`
//! client. It is the only I/O boundary of the reconciler: nothing here opens a socket itself.
//!
//! The main entry point is [`MongoShell`]. Scripts are executed against a database (`admin` by
//! default), optionally on a remote host, and their output is either returned verbatim or
//! normalized and parsed into a [`serde_json::Value`].
//!
//! ```no_run
//! use mongo_shell::{Call, ExecOptions, MongoShell};
//!
//! let shell = MongoShell::new("mongo");
//!
//! let version = shell
//!     .execute("db.version()", &ExecOptions::default().raw())
//!     .expect("mongod is reachable")
//!     .into_text();
//!
//! let status = shell
//!     .execute(Call::new("rs.status"), &ExecOptions::default().host("db1:27017"))
//!     .expect("rs.status() can be queried")
//!     .into_json();
//! ```
//!
//! Scripts should be assembled from [`Call`]s and [`Document`]s instead of string
//! concatenation, so that every user-supplied value ends up JSON-encoded.

mod command;
mod normalize;
mod retry;
mod runner;
mod shell;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::*;
pub use normalize::*;
pub use retry::*;
pub use runner::*;
pub use shell::*;
