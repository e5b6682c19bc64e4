//! External command execution.
//!
//! Everything switchyard does to containers and the proxy goes through a
//! [`CommandRunner`], so the executor and proxy switch can be exercised
//! against a scripted runner in tests.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tracing::debug;

/// An argv plus extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Build from an argv; `None` when `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: Vec::new(),
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Trimmed stderr, or stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Boxed future returned by [`CommandRunner::run`].
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<CommandOutput>> + Send + 'a>>;

/// Runs a command to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> RunFuture<'a>;
}

/// [`CommandRunner`] spawning real processes with tokio.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run<'a>(&'a self, spec: &'a CommandSpec) -> RunFuture<'a> {
        Box::pin(async move {
            debug!(command = %spec.display(), "running command");
            let output = tokio::process::Command::new(&spec.program)
                .args(&spec.args)
                .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await?;

            let result = CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            debug!(command = %spec.display(), code = ?result.code, "command finished");
            Ok(result)
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner shared by the executor and proxy tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replies to commands whose rendering contains a pattern.
    pub struct ScriptedRunner {
        rules: Mutex<Vec<(String, VecDeque<CommandOutput>, CommandOutput)>>,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                rules: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Always answer `output` for commands containing `pattern`.
        pub fn on(&self, pattern: &str, output: CommandOutput) -> &Self {
            self.rules
                .lock()
                .unwrap()
                .push((pattern.to_string(), VecDeque::new(), output));
            self
        }

        /// Answer `first` once, then `then` for commands containing `pattern`.
        pub fn once_then(&self, pattern: &str, first: CommandOutput, then: CommandOutput) -> &Self {
            self.rules
                .lock()
                .unwrap()
                .push((pattern.to_string(), VecDeque::from([first]), then));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(CommandSpec::display).collect()
        }

        pub fn specs(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            success: true,
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(stderr: &str) -> CommandOutput {
        CommandOutput {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run<'a>(&'a self, spec: &'a CommandSpec) -> RunFuture<'a> {
            self.calls.lock().unwrap().push(spec.clone());
            let rendered = spec.display();
            let mut rules = self.rules.lock().unwrap();
            // Last matching rule wins, so tests can override defaults.
            let reply = rules
                .iter_mut()
                .rev()
                .find(|(pattern, _, _)| rendered.contains(pattern.as_str()))
                .map(|(_, queued, fallback)| queued.pop_front().unwrap_or_else(|| fallback.clone()))
                .unwrap_or_else(|| ok(""));
            Box::pin(async move { Ok(reply) })
        }
    }
}
