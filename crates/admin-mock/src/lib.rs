//! Scriptable in-memory administration backend for tests.
//!
//! Every executed command is recorded. Behavior is looked up by
//! `(command, target)`; commands without a scripted behavior succeed
//! immediately.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use testbed_admin::{
    Address, AdminService, Command, CommandKind, CommandSpec, Context, Destination,
    DestinationOptions, Error, Notifier, Parameters,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A command execution seen by the mock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Name of the destination.
    pub destination: String,

    /// Address of the destination.
    pub address: Address,

    /// Command verb.
    pub command: String,

    /// Command target.
    pub target: String,

    /// Command kind.
    pub kind: CommandKind,

    /// Parameters passed to `execute`.
    pub parameters: Parameters,

    /// Discovery port set on the destination when the command ran.
    pub discovery_port: Option<u16>,

    /// Context environment when the command ran.
    pub environment: BTreeMap<String, String>,
}

/// How a scripted command behaves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// Exit code reported on completion.
    pub exit_code: i32,

    /// Lines reported through `Notifier::info`.
    pub output: Vec<String>,

    /// Lines reported through `Notifier::error`.
    pub errors: Vec<String>,

    /// Time the command takes to complete.
    pub delay: Duration,

    /// Complete only once the command is cancelled.
    pub until_cancelled: bool,
}

impl Reply {
    /// A command that succeeds at once.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// A command that completes with `exit_code`.
    #[must_use]
    pub fn exit(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// A command that never completes unless cancelled.
    #[must_use]
    pub fn until_cancelled() -> Self {
        Self {
            until_cancelled: true,
            ..Self::default()
        }
    }

    /// Adds informational output.
    #[must_use]
    pub fn with_output<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Adds error output.
    #[must_use]
    pub fn with_errors<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.errors.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Delays completion.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Behavior = Arc<dyn Fn(&Invocation) -> Result<Reply, String> + Send + Sync>;

#[derive(Default)]
struct State {
    behaviors: HashMap<(String, String), Behavior>,
    invocations: Vec<Invocation>,
    cancellations: Vec<(String, String)>,
}

/// In-memory administration backend.
#[derive(Clone, Default)]
pub struct MockAdminService {
    state: Arc<Mutex<State>>,
}

impl MockAdminService {
    /// Creates a new instance of `MockAdminService`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts how `command target` behaves.
    ///
    /// An `Err` from `behavior` makes `execute` fail with an illegal
    /// argument carrying the message.
    pub fn upon<F>(&self, command: &str, target: &str, behavior: F)
    where
        F: Fn(&Invocation) -> Result<Reply, String> + Send + Sync + 'static,
    {
        self.state.lock().behaviors.insert(
            (command.to_string(), target.to_string()),
            Arc::new(behavior),
        );
    }

    /// Every command executed so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    /// Executions of `command target`, in order.
    #[must_use]
    pub fn invocations_of(&self, command: &str, target: &str) -> Vec<Invocation> {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|invocation| invocation.command == command && invocation.target == target)
            .cloned()
            .collect()
    }

    /// `(command, target)` of every cancelled command, in order.
    #[must_use]
    pub fn cancellations(&self) -> Vec<(String, String)> {
        self.state.lock().cancellations.clone()
    }

    fn destination(
        &self,
        context: Arc<Context>,
        name: String,
        options: DestinationOptions,
        is_node: bool,
    ) -> Arc<dyn Destination> {
        Arc::new(MockDestination {
            name,
            address: options.address,
            context,
            is_node,
            discovery_port: Arc::new(Mutex::new(None)),
            state: self.state.clone(),
        })
    }
}

impl fmt::Debug for MockAdminService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockAdminService").finish_non_exhaustive()
    }
}

impl AdminService for MockAdminService {
    fn new_destination(
        &self,
        context: Arc<Context>,
        options: DestinationOptions,
    ) -> Result<Arc<dyn Destination>, Error> {
        let name = options.address.to_string();
        Ok(self.destination(context, name, options, false))
    }

    fn new_node(
        &self,
        context: Arc<Context>,
        name: &str,
        options: DestinationOptions,
    ) -> Result<Arc<dyn Destination>, Error> {
        Ok(self.destination(context, name.to_string(), options, true))
    }
}

struct MockDestination {
    name: String,
    address: Address,
    context: Arc<Context>,
    is_node: bool,
    discovery_port: Arc<Mutex<Option<u16>>>,
    state: Arc<Mutex<State>>,
}

impl fmt::Debug for MockDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDestination")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Destination for MockDestination {
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
        self.is_node
    }

    fn create_command(&self, spec: &CommandSpec) -> Result<Arc<dyn Command>, Error> {
        if spec.kind == CommandKind::InstallNode && !self.is_node {
            return Err(Error::IllegalArgument(format!(
                "{} is not a node and cannot be installed",
                self.name
            )));
        }

        Ok(Arc::new(MockCommand {
            spec: spec.clone(),
            destination: self.name.clone(),
            address: self.address.clone(),
            context: self.context.clone(),
            discovery_port: self.discovery_port.clone(),
            state: self.state.clone(),
            running: Mutex::new(None),
            cancelled: CancellationToken::new(),
        }))
    }
}

struct Running {
    reply: Reply,
    notifier: Arc<dyn Notifier>,
}

struct MockCommand {
    spec: CommandSpec,
    destination: String,
    address: Address,
    context: Arc<Context>,
    discovery_port: Arc<Mutex<Option<u16>>>,
    state: Arc<Mutex<State>>,
    running: Mutex<Option<Running>>,
    cancelled: CancellationToken,
}

impl fmt::Debug for MockCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCommand")
            .field("destination", &self.destination)
            .field("command", &self.spec.command)
            .field("target", &self.spec.target)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Command for MockCommand {
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
        let invocation = Invocation {
            destination: self.destination.clone(),
            address: self.address.clone(),
            command: self.spec.command.clone(),
            target: self.spec.target.clone(),
            kind: self.spec.kind.clone(),
            parameters,
            discovery_port: *self.discovery_port.lock(),
            environment: self.context.environment(),
        };
        debug!(
            "mock {} {} on {}",
            invocation.command, invocation.target, invocation.destination
        );

        let behavior = {
            let mut state = self.state.lock();
            state.invocations.push(invocation.clone());
            state
                .behaviors
                .get(&(self.spec.command.clone(), self.spec.target.clone()))
                .cloned()
        };

        let reply = match behavior {
            Some(behavior) => behavior(&invocation).map_err(Error::IllegalArgument)?,
            None => Reply::success().with_output([format!(
                "Processing command '{} {}'",
                self.spec.command, self.spec.target
            )]),
        };

        notifier.start();
        for line in &reply.output {
            notifier.info(&self.destination, line);
        }
        for line in &reply.errors {
            notifier.error(&self.destination, line);
        }

        *self.running.lock() = Some(Running { reply, notifier });

        Ok(())
    }

    async fn wait_for_completion(&self) -> Result<i32, Error> {
        let Running { reply, notifier } = self.running.lock().take().ok_or_else(|| {
            Error::IllegalState(format!(
                "{} {} was not executed",
                self.spec.command, self.spec.target
            ))
        })?;

        if reply.until_cancelled {
            self.cancelled.cancelled().await;
        } else if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        if reply.exit_code != 0 {
            notifier.failed(reply.exit_code);
        }
        notifier.complete();

        Ok(reply.exit_code)
    }

    fn cancel(&self) {
        self.state
            .lock()
            .cancellations
            .push((self.spec.command.clone(), self.spec.target.clone()));
        self.cancelled.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use testbed_admin::DestinationExt;

    #[derive(Default)]
    struct Lines(Mutex<Vec<String>>);

    impl Notifier for Lines {
        fn start(&self) {}

        fn info(&self, source: &str, message: &str) {
            self.0.lock().push(format!("{source}: {message}"));
        }

        fn error(&self, source: &str, message: &str) {
            self.0.lock().push(format!("{source}! {message}"));
        }

        fn results(&self, _lines: &[String]) {}

        fn failed(&self, exit_code: i32) {
            self.0.lock().push(format!("failed {exit_code}"));
        }

        fn complete(&self) {}
    }

    fn service_destination(admin: &MockAdminService, name: &str) -> Arc<dyn Destination> {
        let context = admin.new_context(std::path::Path::new("/opt/product"));
        admin
            .new_destination(
                context,
                DestinationOptions::new(Address::Service(name.to_string())),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_unscripted_command_succeeds() {
        let admin = MockAdminService::new();
        let destination = service_destination(&admin, "A.cluster");
        destination.set_discovery_port(54000);

        let command = destination.new_command("display", "node").build().unwrap();
        let lines = Arc::new(Lines::default());
        command
            .execute(Parameters::new(), lines.clone())
            .await
            .unwrap();

        assert_eq!(command.wait_for_completion().await.unwrap(), 0);
        assert_eq!(
            *lines.0.lock(),
            vec!["A.cluster: Processing command 'display node'".to_string()]
        );

        let invocations = admin.invocations_of("display", "node");
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].discovery_port, Some(54000));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let admin = MockAdminService::new();
        admin.upon("start", "node", |_| {
            Ok(Reply::exit(3).with_errors(["node refused to start"]))
        });

        let destination = service_destination(&admin, "A.cluster");
        let command = destination.new_command("start", "node").build().unwrap();
        let lines = Arc::new(Lines::default());
        command
            .execute(Parameters::new(), lines.clone())
            .await
            .unwrap();

        assert_eq!(command.wait_for_completion().await.unwrap(), 3);
        assert_eq!(
            *lines.0.lock(),
            vec![
                "A.cluster! node refused to start".to_string(),
                "failed 3".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_illegal_argument() {
        let admin = MockAdminService::new();
        admin.upon("stop", "node", |_| Err("bad parameter".to_string()));

        let destination = service_destination(&admin, "A.cluster");
        let command = destination.new_command("stop", "node").build().unwrap();

        assert_matches!(
            command
                .execute(Parameters::new(), Arc::new(Lines::default()))
                .await,
            Err(Error::IllegalArgument(message)) if message == "bad parameter"
        );
        assert_eq!(admin.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_install_requires_node() {
        let admin = MockAdminService::new();
        let destination = service_destination(&admin, "cluster");

        assert_matches!(
            destination.new_install_node_command().build(),
            Err(Error::IllegalArgument(_))
        );
    }

    #[tokio::test]
    async fn test_cancel_completes_waiting_command() {
        let admin = MockAdminService::new();
        admin.upon("install", "node", |_| Ok(Reply::until_cancelled()));

        let context = admin.new_context(std::path::Path::new("/opt/product"));
        let node = admin
            .new_node(context, "A.cluster", DestinationOptions::default())
            .unwrap();
        let command = node.new_install_node_command().build().unwrap();
        command
            .execute(Parameters::new(), Arc::new(Lines::default()))
            .await
            .unwrap();

        let waiter = {
            let command = command.clone();
            tokio::spawn(async move { command.wait_for_completion().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        command.cancel();

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
        assert_eq!(
            admin.cancellations(),
            vec![("install".to_string(), "node".to_string())]
        );
    }
}
