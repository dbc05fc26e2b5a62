use mongo_shell::MongoShell;

use crate::probe::{self, Probe, ServerVersion};

/// Everything a reconciliation pass needs to talk to the cluster.
///
/// The context owns the [`Probe`], so cached server facts live exactly as long as the context
/// and are shared by all passes run with it.
#[derive(Debug)]
pub struct Context {
    shell: MongoShell,
    probe: Probe,
}

impl Context {
    pub fn new(shell: MongoShell) -> Self {
        Self {
            shell,
            probe: Probe::new(),
        }
    }

    pub fn shell(&self) -> &MongoShell {
        &self.shell
    }

    pub fn server_version(&self) -> Result<&ServerVersion, probe::Error> {
        self.probe.server_version(&self.shell)
    }

    pub fn is_legacy(&self) -> Result<bool, probe::Error> {
        self.probe.is_legacy(&self.shell)
    }

    pub fn authorization_enabled(&self) -> Result<bool, probe::Error> {
        self.probe.authorization_enabled(&self.shell)
    }
}
