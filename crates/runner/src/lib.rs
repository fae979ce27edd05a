//! Harness for running administration commands.
//!
//! A run builds a command, executes it with a logging notifier and, unless
//! detached, waits for it and classifies the exit code. A run may register a
//! cleanup action that fires if the process is shut down while the command is
//! outstanding; the run then fails as aborted.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod notifier;
mod shutdown;

pub use error::Error;
pub use notifier::RecordingNotifier;
pub use shutdown::{ShutdownHookGuard, ShutdownHooks};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use testbed_admin::{Command, CommandBuilder, Parameters};
use tracing::{debug, warn};

/// Boxed error returned by cleanup actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Compensating action run when a command is aborted by shutdown.
pub type Cleanup =
    Arc<dyn Fn(Arc<dyn Command>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Replacement for the default failure reporting.
pub type ErrorHandler = Arc<dyn Fn(&CommandOutcome, i32) -> Result<(), Error> + Send + Sync>;

/// What happens when a command exits with a non-zero code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorHandling {
    /// The run fails.
    #[default]
    Fail,

    /// The failure is logged and the run succeeds.
    Ignore,
}

/// Options for a single run.
#[derive(Clone)]
pub struct RunOptions {
    /// Wait for completion. When false the run returns once the command is
    /// dispatched.
    pub wait: bool,

    /// Policy for non-zero exit codes.
    pub error_handling: ErrorHandling,

    /// Record the command output.
    pub record_output: bool,

    /// Action run if the process shuts down while the command is
    /// outstanding. Requires `ErrorHandling::Fail`.
    pub cleanup: Option<Cleanup>,

    /// Called instead of failing with `Error::CommandFailed`.
    pub on_error: Option<ErrorHandler>,

    /// Location used in logs and errors; the destination name by default.
    pub location: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            wait: true,
            error_handling: ErrorHandling::Fail,
            record_output: false,
            cleanup: None,
            on_error: None,
            location: None,
        }
    }
}

impl RunOptions {
    /// Sets whether to wait for completion.
    #[must_use]
    pub const fn wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the error handling policy.
    #[must_use]
    pub const fn error_handling(mut self, error_handling: ErrorHandling) -> Self {
        self.error_handling = error_handling;
        self
    }

    /// Sets whether to record output.
    #[must_use]
    pub const fn record_output(mut self, record_output: bool) -> Self {
        self.record_output = record_output;
        self
    }

    /// Sets the shutdown cleanup action.
    #[must_use]
    pub fn cleanup(mut self, cleanup: Cleanup) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Sets the failure handler.
    #[must_use]
    pub fn on_error(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = Some(on_error);
        self
    }

    /// Sets the location used in logs and errors.
    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("wait", &self.wait)
            .field("error_handling", &self.error_handling)
            .field("record_output", &self.record_output)
            .field("cleanup", &self.cleanup.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("location", &self.location)
            .finish()
    }
}

/// Result of a run.
#[derive(Debug)]
pub struct CommandOutcome {
    command: Arc<dyn Command>,
    location: String,
    exit_code: Option<i32>,
    notifier: Arc<RecordingNotifier>,
}

impl CommandOutcome {
    /// The command that ran.
    #[must_use]
    pub fn command(&self) -> &Arc<dyn Command> {
        &self.command
    }

    /// Where the command was sent.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The exit code, or `None` for a detached run.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the run returned without waiting.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.exit_code.is_none()
    }

    /// The output recorded so far, if recording was requested.
    #[must_use]
    pub fn output(&self) -> Option<String> {
        self.notifier.output()
    }

    /// The notifier the command reports to.
    #[must_use]
    pub fn notifier(&self) -> &Arc<RecordingNotifier> {
        &self.notifier
    }
}

/// Runs administration commands.
#[derive(Clone)]
pub struct CommandRunner {
    hooks: Arc<ShutdownHooks>,
}

impl CommandRunner {
    /// Creates a runner registering cleanup actions in `hooks`.
    #[must_use]
    pub const fn new(hooks: Arc<ShutdownHooks>) -> Self {
        Self { hooks }
    }

    /// The registry cleanup actions are registered in.
    #[must_use]
    pub const fn hooks(&self) -> &Arc<ShutdownHooks> {
        &self.hooks
    }

    /// Builds and runs a command.
    ///
    /// # Errors
    ///
    /// Returns `Error::Aborted` if the process was shut down while waiting,
    /// `Error::CommandFailed` (or the error handler's error) for a non-zero
    /// exit code under `ErrorHandling::Fail`, and `Error::IllegalArgument`
    /// or `Error::Admin` if the backend rejects the command.
    ///
    /// # Panics
    ///
    /// In debug builds, if a cleanup action is combined with
    /// `ErrorHandling::Ignore`.
    pub async fn run(
        &self,
        builder: &CommandBuilder,
        parameters: Parameters,
        options: RunOptions,
    ) -> Result<CommandOutcome, Error> {
        let RunOptions {
            wait,
            error_handling,
            record_output,
            cleanup,
            on_error,
            location,
        } = options;

        debug_assert!(
            cleanup.is_none() || error_handling == ErrorHandling::Fail,
            "a cleanup action requires ErrorHandling::Fail"
        );

        let location = location.unwrap_or_else(|| builder.destination().name());
        let name = builder.command().to_string();
        let target = builder.target().to_string();

        let command = builder
            .build()
            .map_err(|e| admin_error(&name, &target, &location, e))?;

        let aborted = Arc::new(AtomicBool::new(false));
        let guard = cleanup.map(|cleanup| {
            let command = command.clone();
            let aborted = aborted.clone();
            let description = format!("{name} {target}");

            self.hooks.register(move || async move {
                aborted.store(true, Ordering::SeqCst);
                warn!("command: {} was aborted - attempting to clean up", description);

                command.cancel();
                if let Err(e) = cleanup(command).await {
                    debug!("cleanup after {} failed: {}", description, e);
                }
            })
        });

        let notifier = Arc::new(RecordingNotifier::new(
            &name,
            &target,
            &location,
            error_handling,
            record_output,
        ));

        command
            .execute(parameters, notifier.clone())
            .await
            .map_err(|e| admin_error(&name, &target, &location, e))?;

        let mut outcome = CommandOutcome {
            command,
            location,
            exit_code: None,
            notifier,
        };

        if !wait {
            if let Some(guard) = guard {
                guard.detach();
            }
            return Ok(outcome);
        }

        let exit_code = outcome
            .command
            .wait_for_completion()
            .await
            .map_err(|e| admin_error(&name, &target, &outcome.location, e))?;
        drop(guard);

        if aborted.load(Ordering::SeqCst) {
            return Err(Error::Aborted {
                command: name,
                target,
            });
        }

        outcome.exit_code = Some(exit_code);

        if exit_code != 0 && error_handling == ErrorHandling::Fail {
            match on_error {
                Some(on_error) => on_error(&outcome, exit_code)?,
                None => {
                    return Err(Error::CommandFailed {
                        command: name,
                        target,
                        location: outcome.location,
                        exit_code,
                    });
                }
            }
        }

        Ok(outcome)
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(ShutdownHooks::global())
    }
}

impl fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRunner")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

fn admin_error(command: &str, target: &str, location: &str, error: testbed_admin::Error) -> Error {
    match error {
        testbed_admin::Error::IllegalArgument(message) => Error::IllegalArgument {
            command: command.to_string(),
            target: target.to_string(),
            location: location.to_string(),
            message,
        },
        source => Error::Admin {
            command: command.to_string(),
            target: target.to_string(),
            location: location.to_string(),
            source,
        },
    }
}
