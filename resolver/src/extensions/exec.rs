//! Out-of-process transforms.
//!
//! The `exec` extension runs an external program per artifact:
//! `<program> [args...] <input> <output>`. Supporting artifacts declared with
//! `dep` lines are passed to the child through `STOWAWAY_SUPPORT_PATH`, so
//! the tool runs against its own libraries in its own process.
//!
//! ```text
//! __exec__
//! command java -jar tools/shader.jar
//! timeout 120
//! dep org.example:shader-support:1.0 <sha256>
//! __end__
//! ```

use crate::pipeline::{
    ConfigError, ExecutionScope, Export, Extension, ExtensionConfig, Processor, ProcessorError,
};
use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use std::env;
use std::io::Read;
use std::process::{ChildStderr, Command, Stdio};
use std::thread;
use std::time::Duration;
use stowaway_common::coordinate::ArtifactCoordinate;
use wait_timeout::ChildExt;

/// Manifest section name of the exec extension.
pub const NAME: &str = "exec";

/// Symbol the exec processor is published under.
pub const PROCESSOR: &str = "stowaway.exec";

/// Environment variable listing supporting artifacts for the child.
pub const SUPPORT_PATH_ENV: &str = "STOWAWAY_SUPPORT_PATH";

/// Bytes of stderr kept in a failure report.
const STDERR_TAIL: usize = 4096;

/// Time a command may run when the section sets no `timeout`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Parsed `__exec__` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    dependencies: Vec<ArtifactCoordinate>,
}

impl ExecConfig {
    /// Program to run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fixed arguments placed before the input and output paths.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// How long the command may run.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The `exec` extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecExtension;

impl Extension for ExecExtension {
    fn parse_config(&self, lines: &[String]) -> Result<ExtensionConfig, ConfigError> {
        let invalid = |line: &str, reason: &str| ConfigError::InvalidLine {
            line: line.to_owned(),
            reason: reason.to_owned(),
        };
        let mut command: Option<Vec<String>> = None;
        let mut timeout = DEFAULT_COMMAND_TIMEOUT;
        let mut dependencies = Vec::new();

        for line in lines {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("command") => {
                    if command.is_some() {
                        return Err(invalid(line, "`command` given more than once"));
                    }
                    let argv: Vec<String> = words.map(str::to_owned).collect();
                    if argv.is_empty() {
                        return Err(invalid(line, "`command` needs a program"));
                    }
                    command = Some(argv);
                }
                Some("timeout") => {
                    let secs = words
                        .next()
                        .and_then(|value| value.parse::<u64>().ok())
                        .filter(|secs| *secs > 0)
                        .ok_or_else(|| invalid(line, "expected a positive number of seconds"))?;
                    timeout = Duration::from_secs(secs);
                }
                Some("dep") => {
                    let rest = line.trim_start().strip_prefix("dep").unwrap_or_default();
                    dependencies.push(ArtifactCoordinate::parse_line(rest)?);
                }
                _ => return Err(invalid(line, "expected `command`, `timeout` or `dep`")),
            }
        }

        let mut argv = command
            .ok_or_else(|| ConfigError::Incomplete {
                reason: "exec section needs a `command` line".to_owned(),
            })?
            .into_iter();
        let program = argv.next().unwrap_or_default();
        Ok(ExtensionConfig::new(ExecConfig {
            program,
            args: argv.collect(),
            timeout,
            dependencies,
        }))
    }

    fn dependencies(&self, config: &ExtensionConfig) -> Vec<ArtifactCoordinate> {
        config
            .downcast_ref::<ExecConfig>()
            .map(|exec| exec.dependencies.clone())
            .unwrap_or_default()
    }

    fn processor_identity(&self) -> String {
        PROCESSOR.to_owned()
    }

    fn exports(&self) -> Vec<Export> {
        vec![Export::new(PROCESSOR, ExecProcessor::construct)]
    }
}

/// Runs the configured command for each artifact.
pub struct ExecProcessor {
    config: ExecConfig,
    support: Vec<Utf8PathBuf>,
}

impl ExecProcessor {
    fn construct(
        config: &ExtensionConfig,
        scope: &ExecutionScope,
    ) -> Result<Box<dyn Processor>, ProcessorError> {
        let exec = config.expect_type::<ExecConfig>(PROCESSOR)?;
        Ok(Box::new(Self {
            config: exec.clone(),
            support: scope.support_artifacts().to_vec(),
        }))
    }

    fn command_error(&self, reason: impl Into<String>) -> ProcessorError {
        ProcessorError::Command {
            program: self.config.program.clone(),
            reason: reason.into(),
        }
    }
}

impl Processor for ExecProcessor {
    fn process(&self, input: &Utf8Path, output: &Utf8Path) -> Result<(), ProcessorError> {
        let support_path = env::join_paths(&self.support)
            .map_err(|e| self.command_error(format!("invalid support path: {e}")))?;
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(input.as_str())
            .arg(output.as_str())
            .env(SUPPORT_PATH_ENV, support_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        debug!("running {} on {input}", self.config.program);

        let mut child = cmd
            .spawn()
            .map_err(|e| self.command_error(format!("failed to start: {e}")))?;
        let stderr = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || drain(pipe)));
        let waited = child
            .wait_timeout(self.config.timeout)
            .map_err(|e| self.command_error(format!("failed to wait: {e}")))?;
        let Some(status) = waited else {
            if let Err(e) = child.kill() {
                debug!("failed to kill {}: {e}", self.config.program);
            }
            if let Err(e) = child.wait() {
                debug!("failed to reap {}: {e}", self.config.program);
            }
            return Err(ProcessorError::TimedOut {
                program: self.config.program.clone(),
                timeout: self.config.timeout,
            });
        };
        if status.success() {
            return Ok(());
        }
        let captured = stderr.map_or_else(String::new, |reader| reader.join().unwrap_or_default());
        Err(self.command_error(format!("{status}: {}", tail(&captured))))
    }

    fn cache_key(&self) -> Option<String> {
        let mut key = self.config.program.clone();
        for arg in &self.config.args {
            key.push(' ');
            key.push_str(arg);
        }
        Some(format!("{key};timeout={}", self.config.timeout.as_secs()))
    }
}

/// Read a child's stderr to the end.
///
/// Runs beside the wait so a chatty child never blocks on a full pipe.
fn drain(mut pipe: ChildStderr) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut bytes) {
        debug!("failed to read child stderr: {e}");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// The last [`STDERR_TAIL`] bytes of `text`, trimmed, on a char boundary.
fn tail(text: &str) -> &str {
    let trimmed = text.trim();
    let mut start = trimmed.len().saturating_sub(STDERR_TAIL);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed.get(start..).unwrap_or(trimmed)
}
