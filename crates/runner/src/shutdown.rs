//! Process-wide registry of compensating actions run at shutdown.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use futures::future::{BoxFuture, FutureExt, join_all};
use parking_lot::Mutex;
use tracing::debug;

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

static GLOBAL: LazyLock<Arc<ShutdownHooks>> = LazyLock::new(|| Arc::new(ShutdownHooks::new()));

/// Actions to run if the process is asked to terminate.
///
/// Each registration is tied to a [`ShutdownHookGuard`]; dropping the guard
/// deregisters the action, so a hook never outlives the operation it
/// compensates for.
#[derive(Default)]
pub struct ShutdownHooks {
    next_id: AtomicU64,
    hooks: Mutex<BTreeMap<u64, Hook>>,
}

impl ShutdownHooks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry the binary runs on SIGINT/SIGTERM.
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Registers `hook` until the returned guard is dropped.
    pub fn register<F, Fut>(self: &Arc<Self>, hook: F) -> ShutdownHookGuard
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.hooks
            .lock()
            .insert(id, Box::new(move || hook().boxed()));

        ShutdownHookGuard {
            id,
            hooks: self.clone(),
            armed: true,
        }
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Whether no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }

    /// Runs every registered hook concurrently and waits for all of them.
    ///
    /// Hooks are removed before they run, so each runs at most once.
    pub async fn run_all(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        debug!("running {} shutdown hooks", hooks.len());

        join_all(hooks.into_values().map(|hook| hook())).await;
    }
}

/// Keeps a shutdown hook registered while alive.
#[must_use = "dropping the guard deregisters the hook"]
pub struct ShutdownHookGuard {
    id: u64,
    hooks: Arc<ShutdownHooks>,
    armed: bool,
}

impl ShutdownHookGuard {
    /// Leaves the hook registered for the rest of the process.
    pub fn detach(mut self) {
        self.armed = false;
    }
}

impl Drop for ShutdownHookGuard {
    fn drop(&mut self) {
        if self.armed {
            self.hooks.hooks.lock().remove(&self.id);
        }
    }
}
