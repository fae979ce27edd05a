//! Administration backend driving the product's admin tool.
//!
//! Each command runs the admin executable once as a child process. Standard
//! output is reported as information and standard error as errors; the exit
//! status becomes the command's exit code.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod arguments;

pub use arguments::command_arguments;

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use testbed_admin::{
    AdminService, Command, CommandSpec, Context, Destination, DestinationOptions, Error,
    Notifier, Parameters,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Location of the admin tool inside a product installation.
pub const DEFAULT_EXECUTABLE: &str = "distrib/tibco/bin/epadmin";

/// Exit code reported for a process killed by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Options for configuring a `ProcessAdminService`.
#[derive(Clone, Debug)]
pub struct ProcessAdminServiceOptions {
    /// Admin tool to run. Defaults to [`DEFAULT_EXECUTABLE`] inside the
    /// context's installation.
    pub executable: Option<PathBuf>,

    /// How long a cancelled command may take to exit before it is killed.
    pub terminate_timeout: Duration,
}

impl Default for ProcessAdminServiceOptions {
    fn default() -> Self {
        Self {
            executable: None,
            terminate_timeout: Duration::from_secs(10),
        }
    }
}

/// Administration backend running the admin tool per command.
#[derive(Clone, Debug)]
pub struct ProcessAdminService {
    executable: Option<PathBuf>,
    terminate_timeout: Duration,
}

impl ProcessAdminService {
    /// Creates a new instance of `ProcessAdminService`.
    #[must_use]
    pub fn new(
        ProcessAdminServiceOptions {
            executable,
            terminate_timeout,
        }: ProcessAdminServiceOptions,
    ) -> Self {
        Self {
            executable,
            terminate_timeout,
        }
    }

    fn executable(&self, context: &Context) -> PathBuf {
        self.executable
            .clone()
            .unwrap_or_else(|| context.installation().join(DEFAULT_EXECUTABLE))
    }

    fn destination(
        &self,
        context: Arc<Context>,
        name: String,
        node: bool,
        options: DestinationOptions,
    ) -> Arc<dyn Destination> {
        Arc::new(ProcessDestination {
            executable: self.executable(&context),
            terminate_timeout: self.terminate_timeout,
            name,
            node,
            options,
            context,
            discovery_port: Mutex::new(None),
        })
    }
}

impl AdminService for ProcessAdminService {
    fn new_destination(
        &self,
        context: Arc<Context>,
        options: DestinationOptions,
    ) -> Result<Arc<dyn Destination>, Error> {
        let name = options.address.to_string();
        Ok(self.destination(context, name, false, options))
    }

    fn new_node(
        &self,
        context: Arc<Context>,
        name: &str,
        options: DestinationOptions,
    ) -> Result<Arc<dyn Destination>, Error> {
        if name.is_empty() {
            return Err(Error::IllegalArgument("node name is empty".to_string()));
        }

        Ok(self.destination(context, name.to_string(), true, options))
    }
}

#[derive(Debug)]
struct ProcessDestination {
    executable: PathBuf,
    terminate_timeout: Duration,
    name: String,
    node: bool,
    options: DestinationOptions,
    context: Arc<Context>,
    discovery_port: Mutex<Option<u16>>,
}

impl Destination for ProcessDestination {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn set_discovery_port(&self, port: u16) {
        *self.discovery_port.lock() = Some(port);
    }

    fn discovery_port(&self) -> Option<u16> {
        *self.discovery_port.lock()
    }

    fn is_node(&self) -> bool {
        self.node
    }

    fn create_command(&self, spec: &CommandSpec) -> Result<Arc<dyn Command>, Error> {
        if spec.kind == testbed_admin::CommandKind::InstallNode && !self.node {
            return Err(Error::IllegalArgument(format!(
                "{} is not a node and cannot be installed",
                self.name
            )));
        }

        Ok(Arc::new(ProcessCommand {
            executable: self.executable.clone(),
            terminate_timeout: self.terminate_timeout,
            source: self.name.clone(),
            node_name: self.node.then(|| self.name.clone()),
            options: self.options.clone(),
            discovery_port: self.discovery_port(),
            spec: spec.clone(),
            context: self.context.clone(),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            running: Mutex::new(None),
        }))
    }
}

struct Running {
    exit_code: oneshot::Receiver<i32>,
    notifier: Arc<dyn Notifier>,
}

struct ProcessCommand {
    executable: PathBuf,
    terminate_timeout: Duration,
    source: String,
    node_name: Option<String>,
    options: DestinationOptions,
    discovery_port: Option<u16>,
    spec: CommandSpec,
    context: Arc<Context>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    running: Mutex<Option<Running>>,
}

impl fmt::Debug for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCommand")
            .field("executable", &self.executable)
            .field("source", &self.source)
            .field("command", &self.spec.command)
            .field("target", &self.spec.target)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Command for ProcessCommand {
    fn command(&self) -> &str {
        &self.spec.command
    }

    fn target(&self) -> &str {
        &self.spec.target
    }

    async fn execute(
        &self,
        parameters: Parameters,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(), Error> {
        if self.running.lock().is_some() || self.task_tracker.is_closed() {
            return Err(Error::IllegalState(format!(
                "{} {} was already executed",
                self.spec.command, self.spec.target
            )));
        }

        let arguments = command_arguments(
            self.node_name.as_deref(),
            &self.options,
            self.discovery_port,
            &self.spec,
            &parameters,
        );

        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.args(&arguments)
            .envs(self.context.environment())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            "Spawning {} {} {}",
            self.executable.display(),
            self.spec.command,
            self.spec.target
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Io("Failed to spawn admin command", e))?;

        notifier.start();

        if let Some(stdout) = child.stdout.take() {
            let notifier = notifier.clone();
            let source = self.source.clone();
            self.task_tracker.spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    notifier.info(&source, &line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let notifier = notifier.clone();
            let source = self.source.clone();
            self.task_tracker.spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    notifier.error(&source, &line);
                }
            });
        }

        self.task_tracker.close();

        let (exit_tx, exit_rx) = oneshot::channel();
        let shutdown_token = self.shutdown_token.clone();
        let terminate_timeout = self.terminate_timeout;
        let pid = child.id();

        tokio::task::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                () = shutdown_token.cancelled() => {
                    info!("Cancel requested, terminating admin command...");

                    if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
                        if let Err(err) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                            error!("Failed to send SIGTERM to admin command: {}", err);
                        }
                    }

                    if let Ok(status) = tokio::time::timeout(terminate_timeout, child.wait()).await {
                        status
                    } else {
                        error!("Timeout waiting for admin command to exit, killing...");
                        if let Err(err) = child.kill().await {
                            error!("Failed to kill admin command: {}", err);
                        }
                        child.wait().await
                    }
                }
            };

            let exit_code = match status {
                Ok(status) => status.code().unwrap_or(SIGNALLED_EXIT_CODE),
                Err(err) => {
                    error!("Failed to wait for admin command: {}", err);
                    SIGNALLED_EXIT_CODE
                }
            };

            let _ = exit_tx.send(exit_code);
        });

        *self.running.lock() = Some(Running {
            exit_code: exit_rx,
            notifier,
        });

        Ok(())
    }

    async fn wait_for_completion(&self) -> Result<i32, Error> {
        let Running {
            exit_code,
            notifier,
        } = self.running.lock().take().ok_or_else(|| {
            Error::IllegalState(format!(
                "{} {} is not running",
                self.spec.command, self.spec.target
            ))
        })?;

        let exit_code = exit_code.await.unwrap_or(SIGNALLED_EXIT_CODE);

        // Drain remaining output before reporting completion.
        self.task_tracker.wait().await;

        if exit_code != 0 {
            notifier.failed(exit_code);
        }
        notifier.complete();

        Ok(exit_code)
    }

    fn cancel(&self) {
        self.shutdown_token.cancel();
    }
}
