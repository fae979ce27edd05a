//! Lifecycle management of test nodes.
//!
//! Installs, starts, stops and removes the nodes of one cluster through an
//! [`AdminService`]. Installs register a shutdown cleanup that stops and
//! removes the half-installed node. Under static discovery nodes are started
//! in parallel, one thread each.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod discovery;
mod error;
mod node;
mod start;

pub use discovery::{DiscoveryConfig, DiscoveryMode, STATIC_DISCOVERY_ANNOUNCEMENT};
pub use error::Error;
pub use node::{Node, NodeState};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use testbed_admin::{
    Address, AdminService, Command, Context, DeployOptions, Destination, DestinationExt,
    DestinationOptions, Parameters,
};
use testbed_installer::{InstallOutcome, ProductArtifact, ProductInstaller, Unpacker};
use testbed_locks::LockManager;
use testbed_runner::{BoxError, Cleanup, CommandOutcome, CommandRunner, ErrorHandling, RunOptions};
use testbed_util::resolve_discovery_port;
use tracing::{debug, info, warn};

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Build flavor the nodes are installed with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BuildType {
    /// Development build.
    Development,

    /// Production build.
    Production,

    /// Every build type; lets the node decide.
    #[default]
    All,

    /// Coverage-instrumented build; lets the node decide.
    TestCoverage,
}

impl BuildType {
    /// Value of the `buildtype` install parameter, if one is passed.
    #[must_use]
    pub const fn install_parameter(self) -> Option<&'static str> {
        match self {
            Self::Development => Some("DEVELOPMENT"),
            Self::Production => Some("PRODUCTION"),
            Self::All | Self::TestCoverage => None,
        }
    }
}

/// Options for configuring a `NodeLifecycleOrchestrator`.
pub struct OrchestratorOptions {
    /// Administration backend.
    pub admin: Arc<dyn AdminService>,

    /// Context every destination is created in.
    pub context: Arc<Context>,

    /// Runner used for every command.
    pub runner: CommandRunner,

    /// Cluster the nodes belong to.
    pub cluster_name: String,

    /// Directory holding the node directories.
    pub node_directory: PathBuf,

    /// Hosts to contact for discovery.
    pub discovery_hosts: Vec<String>,

    /// Explicit discovery port.
    pub discovery_port: Option<u16>,

    /// File remembering an allocated discovery port.
    pub discovery_port_file: PathBuf,

    /// User name for authentication.
    pub user_name: Option<String>,

    /// Password for authentication.
    pub password: Option<String>,

    /// Environment applied before every command.
    pub environment: BTreeMap<String, String>,

    /// Build flavor passed to installs.
    pub build_type: BuildType,
}

struct Inner {
    admin: Arc<dyn AdminService>,
    context: Arc<Context>,
    runner: CommandRunner,
    cluster_name: String,
    node_directory: PathBuf,
    discovery_hosts: Vec<String>,
    discovery_port: Option<u16>,
    discovery_port_file: PathBuf,
    user_name: Option<String>,
    password: Option<String>,
    environment: BTreeMap<String, String>,
    build_type: BuildType,
    states: Mutex<HashMap<String, NodeState>>,
}

/// Installs, starts, stops and removes the nodes of one cluster.
#[derive(Clone)]
pub struct NodeLifecycleOrchestrator {
    inner: Arc<Inner>,
}

impl NodeLifecycleOrchestrator {
    /// Creates a new instance of `NodeLifecycleOrchestrator`.
    #[must_use]
    pub fn new(
        OrchestratorOptions {
            admin,
            context,
            runner,
            cluster_name,
            node_directory,
            discovery_hosts,
            discovery_port,
            discovery_port_file,
            user_name,
            password,
            environment,
            build_type,
        }: OrchestratorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                admin,
                context,
                runner,
                cluster_name,
                node_directory,
                discovery_hosts,
                discovery_port,
                discovery_port_file,
                user_name,
                password,
                environment,
                build_type,
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The cluster the nodes belong to.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.inner.cluster_name
    }

    /// The node `name` of this cluster.
    #[must_use]
    pub fn node(&self, name: &str) -> Node {
        Node::new(name, &self.inner.cluster_name, &self.inner.node_directory)
    }

    /// Last observed state of node `name`.
    ///
    /// Nodes this orchestrator has not touched are `Installed` if their
    /// directory exists and `Absent` otherwise.
    #[must_use]
    pub fn state(&self, name: &str) -> NodeState {
        if let Some(state) = self.inner.states.lock().get(name) {
            return *state;
        }

        if self.node(name).exists() {
            NodeState::Installed
        } else {
            NodeState::Absent
        }
    }

    /// The discovery port commands are sent with; allocated and remembered
    /// on first use unless configured.
    #[must_use]
    pub fn discovery_port(&self) -> u16 {
        resolve_discovery_port(self.inner.discovery_port, &self.inner.discovery_port_file)
    }

    /// Installs node `name`, replacing any previous installation.
    ///
    /// Returns the install output, which announces static discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the install command fails or is aborted.
    pub async fn install_node(&self, name: &str, parameters: &Parameters) -> Result<String> {
        let node = self.node(name);

        if node.exists() {
            info!("Removing existing node {}", node.service_name());
            self.clear_node(&node).await;
        }

        let mut parameters = parameters.clone();
        if !self.inner.discovery_hosts.is_empty() {
            parameters.insert(
                "discoveryhosts".to_string(),
                self.inner.discovery_hosts.join(","),
            );
        }
        parameters.insert(
            "discoveryport".to_string(),
            self.discovery_port().to_string(),
        );
        if let Some(build_type) = self.inner.build_type.install_parameter() {
            parameters.insert("buildtype".to_string(), build_type.to_string());
        }
        parameters.insert(
            "nodedirectory".to_string(),
            self.inner.node_directory.display().to_string(),
        );

        self.apply_environment();

        let destination = self.inner.admin.new_node(
            self.inner.context.clone(),
            &node.service_name(),
            self.destination_options(Address::Service(node.service_name())),
        )?;
        self.prepare(&destination);
        self.set_state(name, NodeState::Installing);

        let options = RunOptions::default()
            .record_output(true)
            .cleanup(self.compensation(node));

        match self
            .inner
            .runner
            .run(&destination.new_install_node_command(), parameters, options)
            .await
        {
            Ok(outcome) => {
                self.set_state(name, NodeState::Installed);
                Ok(outcome.output().unwrap_or_default())
            }
            Err(e) => {
                let error = Error::from(e);
                self.set_state(
                    name,
                    if error.is_aborted() {
                        NodeState::Aborted
                    } else {
                        NodeState::Absent
                    },
                );
                Err(error)
            }
        }
    }

    /// Installs `names` one after another and collects their discovery
    /// settings.
    ///
    /// # Errors
    ///
    /// Stops at the first node that fails to install.
    pub async fn install_nodes(
        &self,
        names: &[String],
        parameters: &Parameters,
    ) -> Result<DiscoveryConfig> {
        let mut discovery = DiscoveryConfig::dynamic(self.discovery_port());

        for name in names {
            let output = self.install_node(name, parameters).await?;
            discovery.observe(name, &output);
        }

        Ok(discovery)
    }

    /// Starts `names`.
    ///
    /// Under dynamic discovery one command starts the whole cluster. Under
    /// static discovery every node is started on its own thread through its
    /// admin port; all threads are joined before the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingAdminPort` if a node's admin port is unknown
    /// under static discovery and `Error::StartNodes` if any node fails to
    /// start in parallel.
    pub async fn start_nodes(
        &self,
        names: &[String],
        discovery: &DiscoveryConfig,
        parameters: &Parameters,
    ) -> Result<()> {
        match discovery.mode() {
            DiscoveryMode::Dynamic => {
                self.set_states(names, NodeState::Starting);

                let result = self
                    .administer_with(
                        "start",
                        "node",
                        Address::Service(self.inner.cluster_name.clone()),
                        parameters.clone(),
                        RunOptions::default(),
                    )
                    .await;

                match result {
                    Ok(_) => {
                        self.set_states(names, NodeState::Running);
                        Ok(())
                    }
                    Err(e) => {
                        self.set_states(names, NodeState::Installed);
                        Err(e)
                    }
                }
            }
            DiscoveryMode::Static => {
                let nodes = names
                    .iter()
                    .map(|name| {
                        discovery
                            .admin_port(name)
                            .map(|port| (name.clone(), port))
                            .ok_or_else(|| Error::MissingAdminPort(name.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?;

                let orchestrator = self.clone();
                let parameters = parameters.clone();
                tokio::task::spawn_blocking(move || {
                    start::start_in_parallel(&orchestrator, nodes, &parameters)
                })
                .await?
            }
        }
    }

    async fn start_node_by_admin_port(
        &self,
        name: &str,
        admin_port: u16,
        parameters: Parameters,
    ) -> Result<()> {
        self.set_state(name, NodeState::Starting);

        let result = self
            .administer_with(
                "start",
                "node",
                Address::AdminPort {
                    port: admin_port,
                    host_name: None,
                },
                parameters,
                RunOptions::default().location(self.node(name).service_name()),
            )
            .await;

        self.set_state(
            name,
            if result.is_ok() {
                NodeState::Running
            } else {
                NodeState::Installed
            },
        );
        result.map(|_| ())
    }

    /// Stops `names`, or the whole cluster when no names are given.
    ///
    /// Named nodes without a directory are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a stop fails under `ErrorHandling::Fail`.
    pub async fn stop_nodes(
        &self,
        names: Option<&[String]>,
        error_handling: ErrorHandling,
    ) -> Result<()> {
        let Some(names) = names else {
            self.administer_with(
                "stop",
                "node",
                Address::Service(self.inner.cluster_name.clone()),
                Parameters::new(),
                RunOptions::default().error_handling(error_handling),
            )
            .await?;
            return Ok(());
        };

        for name in names {
            let node = self.node(name);
            if !node.exists() {
                debug!("Node {} is not installed, not stopping", node.service_name());
                continue;
            }

            self.set_state(name, NodeState::Stopping);
            match self.stop_node(&node, error_handling).await {
                Ok(()) => self.set_state(name, NodeState::Stopped),
                Err(e) => {
                    self.set_state(name, NodeState::Running);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Removes `names`, or the whole cluster when no names are given.
    ///
    /// Named nodes without a directory are skipped. A node that cannot be
    /// removed by name is removed by installation path.
    ///
    /// # Errors
    ///
    /// Returns an error if a removal fails under `ErrorHandling::Fail`.
    pub async fn remove_nodes(
        &self,
        names: Option<&[String]>,
        error_handling: ErrorHandling,
    ) -> Result<()> {
        let Some(names) = names else {
            self.administer_with(
                "remove",
                "node",
                Address::Service(self.inner.cluster_name.clone()),
                Parameters::new(),
                RunOptions::default().error_handling(error_handling),
            )
            .await?;
            return Ok(());
        };

        for name in names {
            let node = self.node(name);
            if !node.exists() {
                debug!("Node {} is not installed, not removing", node.service_name());
                continue;
            }

            self.set_state(name, NodeState::Removing);
            match self.remove_node(&node, error_handling).await {
                Ok(()) => self.set_state(name, NodeState::Absent),
                Err(e) => {
                    self.set_state(name, NodeState::Stopped);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Removes the node installed at `install_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal fails under `ErrorHandling::Fail`.
    pub async fn remove_installation(
        &self,
        install_path: &Path,
        error_handling: ErrorHandling,
    ) -> Result<()> {
        self.administer_with(
            "remove",
            "node",
            Address::Unaddressed,
            Parameters::from([(
                "installpath".to_string(),
                install_path.display().to_string(),
            )]),
            RunOptions::default()
                .error_handling(error_handling)
                .location(install_path.display().to_string()),
        )
        .await?;

        Ok(())
    }

    /// Runs an arbitrary command against `address`, failing on a non-zero
    /// exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn administer(
        &self,
        command: &str,
        target: &str,
        address: Address,
        parameters: Parameters,
    ) -> Result<CommandOutcome> {
        self.administer_with(
            command,
            target,
            address,
            parameters,
            RunOptions::default().record_output(true),
        )
        .await
    }

    /// Deploys a fragment to `service`, the whole cluster by default.
    ///
    /// When `wait` is false the call returns once the deployment is
    /// dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment fails.
    pub async fn deploy_fragment(
        &self,
        service: Option<&str>,
        deploy: DeployOptions,
        target: &str,
        parameters: Parameters,
        wait: bool,
    ) -> Result<CommandOutcome> {
        let service = service.unwrap_or(&self.inner.cluster_name).to_string();
        let destination = self.destination(Address::Service(service))?;

        Ok(self
            .inner
            .runner
            .run(
                &destination.new_deploy_fragment_command(deploy, target),
                parameters,
                RunOptions::default().wait(wait),
            )
            .await?)
    }

    /// Installs each distinct product among `artifacts` into the context's
    /// installation, see `ProductInstaller::install_products`.
    ///
    /// # Errors
    ///
    /// Returns an error if any product fails to install.
    pub async fn install_products<L, U>(
        &self,
        installer: &ProductInstaller<L, U>,
        markers_directory: &Path,
        artifacts: &[ProductArtifact],
    ) -> Result<Vec<(String, InstallOutcome)>>
    where
        L: LockManager,
        U: Unpacker,
    {
        Ok(installer
            .install_products(self.inner.context.installation(), markers_directory, artifacts)
            .await?)
    }

    async fn administer_with(
        &self,
        command: &str,
        target: &str,
        address: Address,
        parameters: Parameters,
        options: RunOptions,
    ) -> Result<CommandOutcome> {
        let destination = self.destination(address)?;

        Ok(self
            .inner
            .runner
            .run(&destination.new_command(command, target), parameters, options)
            .await?)
    }

    async fn stop_node(&self, node: &Node, error_handling: ErrorHandling) -> Result<()> {
        self.administer_with(
            "stop",
            "node",
            Address::Service(node.service_name()),
            Parameters::new(),
            RunOptions::default().error_handling(error_handling),
        )
        .await?;

        Ok(())
    }

    async fn remove_node(&self, node: &Node, error_handling: ErrorHandling) -> Result<()> {
        let result = self
            .administer_with(
                "remove",
                "node",
                Address::Service(node.service_name()),
                Parameters::new(),
                RunOptions::default().error_handling(error_handling),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if !e.is_aborted() => {
                warn!(
                    "Remove node {} failed, removing by installation path: {}",
                    node.service_name(),
                    e
                );
                self.remove_installation(node.directory(), error_handling)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Stops and removes `node`, then deletes whatever is left of its
    /// directory. Failures are only logged.
    async fn clear_node(&self, node: &Node) {
        if let Err(e) = self.stop_node(node, ErrorHandling::Ignore).await {
            debug!("Stop node {} failed: {}", node.service_name(), e);
        }
        if let Err(e) = self.remove_node(node, ErrorHandling::Ignore).await {
            debug!("Remove node {} failed: {}", node.service_name(), e);
        }

        if node.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(node.directory()).await {
                debug!(
                    "Failed to delete {}: {}",
                    node.directory().display(),
                    e
                );
            }
        }
    }

    /// Cleanup for an aborted install: stop and remove the node.
    fn compensation(&self, node: Node) -> Cleanup {
        let orchestrator = self.clone();

        Arc::new(move |_command: Arc<dyn Command>| {
            let orchestrator = orchestrator.clone();
            let node = node.clone();

            async move {
                let stopped = orchestrator.stop_node(&node, ErrorHandling::Ignore).await;
                let removed = orchestrator
                    .remove_node(&node, ErrorHandling::Ignore)
                    .await;

                stopped.and(removed).map_err(|e| Box::new(e) as BoxError)
            }
            .boxed()
        })
    }

    fn destination(&self, address: Address) -> Result<Arc<dyn Destination>> {
        self.apply_environment();

        let destination = self
            .inner
            .admin
            .new_destination(self.inner.context.clone(), self.destination_options(address))?;
        self.prepare(&destination);

        Ok(destination)
    }

    fn destination_options(&self, address: Address) -> DestinationOptions {
        DestinationOptions {
            address,
            user_name: self.inner.user_name.clone(),
            password: self.inner.password.clone(),
            discovery_hosts: self.inner.discovery_hosts.clone(),
        }
    }

    fn prepare(&self, destination: &Arc<dyn Destination>) {
        let port = self.discovery_port();
        if port != 0 {
            destination.set_discovery_port(port);
        }
    }

    fn apply_environment(&self) {
        self.inner.context.set_environment(&self.inner.environment);
    }

    fn set_state(&self, name: &str, state: NodeState) {
        debug!("Node {} is {}", name, state);
        self.inner.states.lock().insert(name.to_string(), state);
    }

    fn set_states(&self, names: &[String], state: NodeState) {
        for name in names {
            self.set_state(name, state);
        }
    }
}

