use thiserror::Error;

/// Errors that can occur while managing nodes.
#[derive(Debug, Error)]
pub enum Error {
    /// The administration backend rejected a destination.
    #[error(transparent)]
    Admin(#[from] testbed_admin::Error),

    /// A command failed or was aborted.
    #[error(transparent)]
    Command(#[from] testbed_runner::Error),

    /// Product installation failed.
    #[error(transparent)]
    Install(#[from] testbed_installer::Error),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    /// Static discovery is in use but a node never announced its port.
    #[error("no administration port was announced for node {0}")]
    MissingAdminPort(String),

    /// At least one node failed to start; the first failure is kept.
    #[error("Could not start all nodes, start node on {node} failed")]
    StartNodes {
        /// The node whose failure was observed first.
        node: String,

        /// Its failure.
        #[source]
        source: Box<Error>,
    },

    /// The thread starting a node panicked.
    #[error("start thread for node {0} panicked")]
    StartThread(String),
}

impl Error {
    /// Whether the failure is a command aborted by process shutdown.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Command(testbed_runner::Error::Aborted { .. }))
    }
}
