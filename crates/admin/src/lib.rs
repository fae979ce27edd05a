//! Abstract interface to the runtime's administration API.
//!
//! Commands are issued against a [`Destination`]: a single node, a whole
//! cluster addressed by service name, or a node addressed by its admin port.
//! A [`Command`] streams its progress back through a [`Notifier`] and
//! reports an exit code once it completes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod builder;
mod context;
mod destination;
mod error;

pub use builder::{CommandBuilder, CommandKind, CommandSpec, DeployOptions, FragmentType};
pub use context::Context;
pub use destination::{Address, Destination, DestinationExt, DestinationOptions};
pub use error::Error;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

/// Command parameters, passed as `name=value` pairs.
pub type Parameters = BTreeMap<String, String>;

/// Callback sink for a running command.
pub trait Notifier: Send + Sync {
    /// The command started.
    fn start(&self);

    /// Informational output from `source`.
    fn info(&self, source: &str, message: &str);

    /// Error output from `source`.
    fn error(&self, source: &str, message: &str);

    /// Tabular results.
    fn results(&self, lines: &[String]);

    /// The command finished with a non-zero exit code.
    fn failed(&self, exit_code: i32);

    /// The command finished, successfully or not.
    fn complete(&self);
}

/// An administration command bound to a destination.
#[async_trait]
pub trait Command: Debug + Send + Sync {
    /// The command verb, e.g. `start`.
    fn command(&self) -> &str;

    /// The command target, e.g. `node`.
    fn target(&self) -> &str;

    /// Dispatches the command. Progress is reported through `notifier`.
    ///
    /// Returns once the command has been dispatched, not once it completed.
    async fn execute(
        &self,
        parameters: Parameters,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(), Error>;

    /// Waits for a dispatched command and returns its exit code.
    async fn wait_for_completion(&self) -> Result<i32, Error>;

    /// Asks the command to stop. Best effort; may do nothing.
    fn cancel(&self);
}

/// Entry point of an administration backend.
pub trait AdminService: Send + Sync {
    /// Creates a context for the product installed at `installation`.
    fn new_context(&self, installation: &Path) -> Arc<Context> {
        Arc::new(Context::new(installation))
    }

    /// Creates a destination addressed as described by `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the options.
    fn new_destination(
        &self,
        context: Arc<Context>,
        options: DestinationOptions,
    ) -> Result<Arc<dyn Destination>, Error>;

    /// Creates a node destination. Only nodes accept install commands.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the options.
    fn new_node(
        &self,
        context: Arc<Context>,
        name: &str,
        options: DestinationOptions,
    ) -> Result<Arc<dyn Destination>, Error>;
}
