// SPDX-License-Identifier: GPL-3.0-only

//! External command port
//!
//! Every quota and inventory operation shells out through a `CommandRunner`,
//! so the logic above it can be exercised against a scripted runner instead
//! of a host with quota-enabled filesystems.

use std::process::Command;

use tracing::{debug, warn};

use crate::{Result, SysError};

/// Captured result of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout followed by stderr, trimmed; what gets embedded in errors.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

pub fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run `program` to completion. A non-zero exit is reported through
    /// `CommandOutput::success`; only spawn failures are errors.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run `program` and return its stdout, failing on a non-zero exit.
    fn run_checked(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.run(program, args)?;
        if !output.success {
            return Err(SysError::CommandFailed {
                command: render(program, args),
                output: output.combined(),
            });
        }
        Ok(output.stdout)
    }
}

/// Runs commands on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let binary =
            which::which(program).map_err(|_| SysError::ToolNotFound(program.to_string()))?;
        let rendered = render(program, args);

        let output = Command::new(binary).args(args).output()?;
        let output = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if output.success {
            debug!("cmd: [{}]", rendered);
        } else {
            warn!("cmd: [{}], output: {}", rendered, output.combined());
        }
        Ok(output)
    }
}

#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedRunner;

#[cfg(any(test, feature = "testing"))]
mod scripted {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::{CommandOutput, CommandRunner, render};
    use crate::Result;

    type Handler = dyn Fn(&str, &[&str]) -> Option<CommandOutput> + Send + Sync;

    /// Records invocations and answers from registered handlers.
    ///
    /// Handlers are consulted newest first; the first one returning `Some`
    /// wins. Unhandled commands succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        handlers: Mutex<Vec<Box<Handler>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer `program` with `output` whenever its arguments start with `prefix`.
        pub fn on(&self, program: &str, prefix: &[&str], output: CommandOutput) -> &Self {
            let program = program.to_string();
            let prefix: Vec<String> = prefix.iter().map(|arg| arg.to_string()).collect();
            self.on_call(move |called, args| {
                let matches = called == program
                    && args.len() >= prefix.len()
                    && prefix.iter().zip(args).all(|(expected, arg)| expected == arg);
                matches.then(|| output.clone())
            })
        }

        pub fn on_call<F>(&self, handler: F) -> &Self
        where
            F: Fn(&str, &[&str]) -> Option<CommandOutput> + Send + Sync + 'static,
        {
            self.handlers
                .lock()
                .expect("handlers lock poisoned")
                .push(Box::new(handler));
            self
        }

        /// Emulate `getfattr`/`setfattr` for one attribute with an in-memory map.
        pub fn emulate_subtree_attrs(&self, attr: &str) -> &Self {
            let attr = attr.to_string();
            let store: Arc<Mutex<HashMap<String, String>>> = Arc::default();
            self.on_call(move |program, args| {
                let mut store = store.lock().expect("attr store poisoned");
                match program {
                    "getfattr" if args.contains(&attr.as_str()) => {
                        let path = args.last()?;
                        Some(match store.get(*path) {
                            Some(value) => CommandOutput::success(value.clone()),
                            None => CommandOutput::failure(format!("{path}: {attr}: No such attribute")),
                        })
                    }
                    "setfattr" if args.contains(&attr.as_str()) => {
                        let value_at = args.iter().position(|arg| *arg == "-v")? + 1;
                        let value = args.get(value_at)?;
                        let path = args.last()?;
                        store.insert(path.to_string(), value.to_string());
                        Some(CommandOutput::success(""))
                    }
                    _ => None,
                }
            })
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock poisoned").clone()
        }

        pub fn calls_to(&self, program: &str) -> Vec<String> {
            let prefix = format!("{program} ");
            self.calls()
                .into_iter()
                .filter(|call| call == program || call.starts_with(&prefix))
                .collect()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
            self.calls
                .lock()
                .expect("calls lock poisoned")
                .push(render(program, args));

            let handlers = self.handlers.lock().expect("handlers lock poisoned");
            let answer = handlers
                .iter()
                .rev()
                .find_map(|handler| handler(program, args));
            Ok(answer.unwrap_or_else(|| CommandOutput::success("")))
        }
    }
}
