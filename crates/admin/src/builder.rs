use std::fmt::{self, Display};
use std::path::PathBuf;
use std::sync::Arc;

use crate::{Command, Destination, Error};

/// Kind of fragment being deployed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FragmentType {
    /// A plain Java fragment.
    #[default]
    Java,

    /// An EventFlow (StreamBase) fragment.
    EventFlow,

    /// A LiveView fragment.
    LiveView,
}

impl FragmentType {
    /// Name of the fragment type as understood by the admin tooling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::EventFlow => "eventflow",
            Self::LiveView => "liveview",
        }
    }
}

impl Display for FragmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of a fragment deployment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Kind of fragment.
    pub fragment_type: FragmentType,

    /// Options for the process hosting the fragment, e.g. `-Xmx1g`.
    pub execution_options: Vec<String>,

    /// Arguments handed to the application's entry point.
    pub application_arguments: Vec<String>,

    /// `EventFlow` source directories.
    pub eventflow_directories: Vec<PathBuf>,

    /// `LiveView` project directory.
    pub liveview_directory: Option<PathBuf>,
}

/// What a command does, beyond its verb and target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// A plain administration command.
    Admin,

    /// Installation of the destination node.
    InstallNode,

    /// Deployment of a fragment; runs until the application exits.
    DeployFragment(DeployOptions),
}

/// Description of a command to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    /// The command verb.
    pub command: String,

    /// The command target.
    pub target: String,

    /// The command kind.
    pub kind: CommandKind,
}

/// Builds commands against one destination.
#[derive(Clone, Debug)]
pub struct CommandBuilder {
    destination: Arc<dyn Destination>,
    spec: CommandSpec,
}

impl CommandBuilder {
    /// A builder for `command target` against `destination`.
    #[must_use]
    pub fn new(
        destination: Arc<dyn Destination>,
        command: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            destination,
            spec: CommandSpec {
                command: command.into(),
                target: target.into(),
                kind: CommandKind::Admin,
            },
        }
    }

    /// A builder installing the node `destination`.
    #[must_use]
    pub fn install_node(destination: Arc<dyn Destination>) -> Self {
        Self {
            destination,
            spec: CommandSpec {
                command: "install".to_string(),
                target: "node".to_string(),
                kind: CommandKind::InstallNode,
            },
        }
    }

    /// A builder deploying a fragment to `target` on `destination`.
    #[must_use]
    pub fn deploy_fragment(
        destination: Arc<dyn Destination>,
        options: DeployOptions,
        target: impl Into<String>,
    ) -> Self {
        Self {
            destination,
            spec: CommandSpec {
                command: "deploy".to_string(),
                target: target.into(),
                kind: CommandKind::DeployFragment(options),
            },
        }
    }

    /// The destination commands are built against.
    #[must_use]
    pub fn destination(&self) -> &Arc<dyn Destination> {
        &self.destination
    }

    /// The command description.
    #[must_use]
    pub const fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// The command verb.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.spec.command
    }

    /// The command target.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.spec.target
    }

    /// Builds the command.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot run this command, e.g. an
    /// install against a destination that is not a node.
    pub fn build(&self) -> Result<Arc<dyn Command>, Error> {
        self.destination.create_command(&self.spec)
    }
}
