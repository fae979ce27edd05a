use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use crate::builder::{CommandBuilder, DeployOptions};
use crate::{Command, CommandSpec, Context, Error};

/// How a destination is reached.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Address {
    /// A node or cluster by service name, e.g. `A.cluster`.
    Service(String),

    /// A single node by administration port.
    AdminPort {
        /// The administration port.
        port: u16,

        /// The host the node runs on; local when absent.
        host_name: Option<String>,
    },

    /// No address; the command picks its target from its parameters.
    #[default]
    Unaddressed,
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(name) => f.write_str(name),
            Self::AdminPort {
                port,
                host_name: Some(host),
            } => write!(f, "{host}:{port}"),
            Self::AdminPort {
                port,
                host_name: None,
            } => write!(f, "adminport {port}"),
            Self::Unaddressed => f.write_str("local"),
        }
    }
}

/// Addressing and credentials of a destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DestinationOptions {
    /// How the destination is reached.
    pub address: Address,

    /// User name for authentication.
    pub user_name: Option<String>,

    /// Password for authentication.
    pub password: Option<String>,

    /// Hosts to contact for discovery, when broadcast is not available.
    pub discovery_hosts: Vec<String>,
}

impl DestinationOptions {
    /// Options addressing `address`, without credentials.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }
}

/// Something administration commands can be issued against.
pub trait Destination: Debug + Send + Sync {
    /// Display name, used in logs and error messages.
    fn name(&self) -> String;

    /// The context commands run in.
    fn context(&self) -> &Arc<Context>;

    /// Sets the discovery port commands use to find the destination.
    fn set_discovery_port(&self, port: u16);

    /// The discovery port, if one was set.
    fn discovery_port(&self) -> Option<u16>;

    /// Whether this destination is a node that can be installed.
    fn is_node(&self) -> bool;

    /// Creates the command described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if this destination cannot run such a command.
    fn create_command(&self, spec: &CommandSpec) -> Result<Arc<dyn Command>, Error>;
}

/// Builder constructors for shared destinations.
pub trait DestinationExt {
    /// A builder for `command target`.
    fn new_command(&self, command: impl Into<String>, target: impl Into<String>)
    -> CommandBuilder;

    /// A builder deploying a fragment to `target`.
    fn new_deploy_fragment_command(
        &self,
        options: DeployOptions,
        target: impl Into<String>,
    ) -> CommandBuilder;

    /// A builder installing this node.
    fn new_install_node_command(&self) -> CommandBuilder;
}

impl DestinationExt for Arc<dyn Destination> {
    fn new_command(
        &self,
        command: impl Into<String>,
        target: impl Into<String>,
    ) -> CommandBuilder {
        CommandBuilder::new(self.clone(), command, target)
    }

    fn new_deploy_fragment_command(
        &self,
        options: DeployOptions,
        target: impl Into<String>,
    ) -> CommandBuilder {
        CommandBuilder::deploy_fragment(self.clone(), options, target)
    }

    fn new_install_node_command(&self) -> CommandBuilder {
        CommandBuilder::install_node(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(Address::Service("A.cluster".into()).to_string(), "A.cluster");
        assert_eq!(
            Address::AdminPort {
                port: 2000,
                host_name: Some("host".into()),
            }
            .to_string(),
            "host:2000"
        );
        assert_eq!(
            Address::AdminPort {
                port: 2000,
                host_name: None,
            }
            .to_string(),
            "adminport 2000"
        );
        assert_eq!(Address::Unaddressed.to_string(), "local");
    }
}
