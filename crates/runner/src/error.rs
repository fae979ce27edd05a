use thiserror::Error;

/// Errors that can occur while running an administration command.
#[derive(Debug, Error)]
pub enum Error {
    /// The process was shut down while the command was outstanding.
    #[error("command: {command} {target} was aborted - attempting to clean up")]
    Aborted {
        /// The command verb.
        command: String,

        /// The command target.
        target: String,
    },

    /// The backend failed outside of the command itself.
    #[error("command: {command} {target} on {location}: {source}")]
    Admin {
        /// The command verb.
        command: String,

        /// The command target.
        target: String,

        /// Where the command was sent.
        location: String,

        /// The backend failure.
        #[source]
        source: testbed_admin::Error,
    },

    /// The command completed with a non-zero exit code.
    #[error("Command: {command} {target} failed: {location} error code {exit_code}")]
    CommandFailed {
        /// The command verb.
        command: String,

        /// The command target.
        target: String,

        /// Where the command was sent.
        location: String,

        /// The exit code.
        exit_code: i32,
    },

    /// The backend rejected the command's arguments.
    #[error(
        "Illegal argument while using administrative API, command: {command} {target} on {location}: {message}"
    )]
    IllegalArgument {
        /// The command verb.
        command: String,

        /// The command target.
        target: String,

        /// Where the command was sent.
        location: String,

        /// What the backend objected to.
        message: String,
    },

    /// A caller-supplied error handler rejected the outcome.
    #[error("{0}")]
    Rejected(String),
}
