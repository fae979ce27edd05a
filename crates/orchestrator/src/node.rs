use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

/// One runtime instance of the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    name: String,
    cluster: String,
    directory: PathBuf,
}

impl Node {
    /// The node `name` of `cluster`, installed under `node_directory`.
    #[must_use]
    pub fn new(name: &str, cluster: &str, node_directory: &Path) -> Self {
        let service_name = format!("{name}.{cluster}");

        Self {
            directory: node_directory.join(&service_name),
            name: name.to_string(),
            cluster: cluster.to_string(),
        }
    }

    /// The short node name, e.g. `A`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cluster the node belongs to.
    #[must_use]
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// The fully-qualified service name, e.g. `A.cluster`.
    #[must_use]
    pub fn service_name(&self) -> String {
        format!("{}.{}", self.name, self.cluster)
    }

    /// The node's installation directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// A node exists when its directory does.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.directory.exists()
    }
}

/// Lifecycle state of a node, as last observed by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Not installed.
    Absent,

    /// Install command outstanding.
    Installing,

    /// Installed, not running.
    Installed,

    /// Start command outstanding.
    Starting,

    /// Started.
    Running,

    /// Stop command outstanding.
    Stopping,

    /// Stopped.
    Stopped,

    /// Remove command outstanding.
    Removing,

    /// Shut down mid-command; cleanup was attempted.
    Aborted,
}

impl Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Absent => "absent",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Removing => "removing",
            Self::Aborted => "aborted",
        };
        f.write_str(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_naming() {
        let node = Node::new("A", "sample", Path::new("target/test-nodes"));

        assert_eq!(node.service_name(), "A.sample");
        assert_eq!(node.directory(), Path::new("target/test-nodes/A.sample"));
        assert_eq!(node.name(), "A");
        assert_eq!(node.cluster(), "sample");
    }
}
