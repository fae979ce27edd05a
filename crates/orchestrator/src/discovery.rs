use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

/// Install output announcing that the node runs without dynamic discovery.
pub const STATIC_DISCOVERY_ANNOUNCEMENT: &str =
    "Discovery Service: Disabled: disabled via install option";

static ADMIN_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m).*Administration port is (\d+)$").expect("Invalid admin port regex")
});

/// How the administration client finds nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Nodes answer broadcasts on the discovery port.
    #[default]
    Dynamic,

    /// Nodes are addressed by their administration ports.
    Static,
}

/// Discovery settings learned while installing nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryConfig {
    mode: DiscoveryMode,
    port: u16,
    admin_ports: BTreeMap<String, u16>,
}

impl DiscoveryConfig {
    /// Dynamic discovery on `port`.
    #[must_use]
    pub const fn dynamic(port: u16) -> Self {
        Self {
            mode: DiscoveryMode::Dynamic,
            port,
            admin_ports: BTreeMap::new(),
        }
    }

    /// Static discovery with known admin ports.
    #[must_use]
    pub const fn with_admin_ports(port: u16, admin_ports: BTreeMap<String, u16>) -> Self {
        Self {
            mode: DiscoveryMode::Static,
            port,
            admin_ports,
        }
    }

    /// The discovery mode.
    #[must_use]
    pub const fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    /// The discovery port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The announced admin port of `node`.
    #[must_use]
    pub fn admin_port(&self, node: &str) -> Option<u16> {
        self.admin_ports.get(node).copied()
    }

    /// Every announced admin port, by node name.
    #[must_use]
    pub const fn admin_ports(&self) -> &BTreeMap<String, u16> {
        &self.admin_ports
    }

    /// Folds the install output of `node` into the configuration.
    ///
    /// One node announcing static discovery switches the whole cluster to
    /// static discovery.
    pub fn observe(&mut self, node: &str, install_output: &str) {
        if !install_output.contains(STATIC_DISCOVERY_ANNOUNCEMENT) {
            return;
        }

        if self.mode == DiscoveryMode::Dynamic {
            info!("Static discovery detected on node {}", node);
        }
        self.mode = DiscoveryMode::Static;

        match ADMIN_PORT
            .captures(install_output)
            .and_then(|captures| captures[1].parse().ok())
        {
            Some(port) => {
                debug!("Node {} administration port is {}", node, port);
                self.admin_ports.insert(node.to_string(), port);
            }
            None => debug!("Node {} did not announce an administration port", node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_output_changes_nothing() {
        let mut discovery = DiscoveryConfig::dynamic(54000);
        discovery.observe("A", "Installing node\nNode installed\n");

        assert_eq!(discovery, DiscoveryConfig::dynamic(54000));
    }

    #[test]
    fn test_static_output_records_port() {
        let mut discovery = DiscoveryConfig::dynamic(54000);
        discovery.observe(
            "A",
            "\tDiscovery Service: Disabled: disabled via install option\n\
             \tAdministration port is 31337\n\
             Node installed\n",
        );
        discovery.observe("B", "Node installed\n");

        assert_eq!(discovery.mode(), DiscoveryMode::Static);
        assert_eq!(discovery.admin_port("A"), Some(31337));
        assert_eq!(discovery.admin_port("B"), None);
        assert_eq!(discovery.port(), 54000);
    }
}
