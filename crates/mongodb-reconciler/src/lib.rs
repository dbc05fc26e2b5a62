//! Reconciles MongoDB replica sets and user accounts against a declared desired state.
//!
//! Every pass starts from freshly observed cluster state, computes the smallest set of
//! administrative commands needed to converge and issues them through the `mongo` client (see
//! the [`mongo_shell`] crate). Passes are synchronous and process one resource at a time.
//!
//! - [`replset`] initiates replica sets and adds missing members.
//! - [`user`] creates, updates and drops accounts, using the legacy (2.4) or the modern
//!   account-management commands depending on the server generation.
//! - [`engine`] drives both over a [`manifest`] and isolates failures per resource.

pub mod cli;
pub mod context;
pub mod engine;
pub mod ensure;
pub mod logging;
pub mod manifest;
pub mod probe;
pub mod replset;
pub mod user;

#[cfg(test)]
mod test_utils;

// External re-exports
pub use mongo_shell;
