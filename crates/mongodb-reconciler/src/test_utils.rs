use mongo_shell::{
    MongoShell,
    testing::{RecordingSleep, ScriptedRunner},
};

use crate::context::Context;

pub fn shell(runner: &ScriptedRunner) -> MongoShell {
    MongoShell::new("mongo")
        .with_runner(runner.clone())
        .with_sleep(RecordingSleep::default())
}

pub fn context(runner: &ScriptedRunner) -> Context {
    Context::new(shell(runner))
}
