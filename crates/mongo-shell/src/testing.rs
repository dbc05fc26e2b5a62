//! Test doubles for [`Runner`] and [`Sleep`].
//!
//! [`ScriptedRunner`] answers client invocations from a list of canned responses and records
//! every invocation, so tests can assert which scripts were (or were not) sent to which host.

use std::{cell::RefCell, collections::VecDeque, rc::Rc, time::Duration};

use crate::{RunError, Runner, Sleep};

/// A canned client result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Stdout(String),
    Failure(String),
}

impl Response {
    pub fn stdout(output: impl Into<String>) -> Self {
        Self::Stdout(output.into())
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self::Failure(output.into())
    }
}

/// A single recorded client invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
}

impl Invocation {
    /// The value following `--host`, if any.
    pub fn host(&self) -> Option<&str> {
        self.flag("--host")
    }

    /// The value following `--eval`.
    pub fn script(&self) -> Option<&str> {
        self.flag("--eval")
    }

    /// The positional database argument.
    pub fn db(&self) -> Option<&str> {
        self.args.get(1).map(String::as_str)
    }

    fn flag(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == name)
            .and_then(|index| self.args.get(index + 1))
            .map(String::as_str)
    }
}

#[derive(Debug)]
struct Rule {
    host: Option<String>,
    fragment: String,
    responses: VecDeque<Response>,
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<Rule>,
    invocations: Vec<Invocation>,
}

/// A [`Runner`] answering from canned responses.
///
/// A response is selected by the `--host` argument (`None` matching invocations without one)
/// and a fragment the script has to contain. The first matching rule wins. Responses registered
/// for the same host and fragment are returned in order, the last one repeating forever.
/// Invocations without a matching rule fail like an unknown script would.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Rc<RefCell<State>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, host: Option<&str>, fragment: &str, response: Response) {
        let mut state = self.state.borrow_mut();
        let host = host.map(str::to_owned);

        match state
            .rules
            .iter_mut()
            .find(|rule| rule.host == host && rule.fragment == fragment)
        {
            Some(rule) => rule.responses.push_back(response),
            None => state.rules.push(Rule {
                host,
                fragment: fragment.to_owned(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.borrow().invocations.clone()
    }

    /// Returns the scripts of all invocations, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .filter_map(|invocation| invocation.script().map(str::to_owned))
            .collect()
    }

    /// Returns the invocations whose script contains `fragment`.
    pub fn invocations_of(&self, fragment: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|invocation| invocation.script().is_some_and(|s| s.contains(fragment)))
            .collect()
    }
}

impl Runner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<String, RunError> {
        let invocation = Invocation {
            args: args.to_vec(),
        };

        let mut state = self.state.borrow_mut();
        state.invocations.push(invocation.clone());

        let host = invocation.host();
        let script = invocation.script().unwrap_or_default();

        let response = state
            .rules
            .iter_mut()
            .find(|rule| rule.host.as_deref() == host && script.contains(&rule.fragment))
            .and_then(|rule| {
                if rule.responses.len() > 1 {
                    rule.responses.pop_front()
                } else {
                    rule.responses.front().cloned()
                }
            });

        match response {
            Some(Response::Stdout(output)) => Ok(output),
            Some(Response::Failure(output)) => Err(RunError::Exit {
                program: program.to_owned(),
                code: Some(1),
                output,
            }),
            None => Err(RunError::Exit {
                program: program.to_owned(),
                code: Some(1),
                output: format!("no scripted response for {script:?} on {host:?}"),
            }),
        }
    }
}

/// A [`Sleep`] which records the requested waits instead of blocking.
#[derive(Clone, Debug, Default)]
pub struct RecordingSleep {
    waits: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleep {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.borrow().clone()
    }
}

impl Sleep for RecordingSleep {
    fn sleep(&self, duration: Duration) {
        self.waits.borrow_mut().push(duration);
    }
}
