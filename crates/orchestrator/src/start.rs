use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use testbed_admin::Parameters;
use tracing::{debug, warn};

use crate::{Error, NodeLifecycleOrchestrator};

/// Starts each `(node, admin port)` on its own thread and joins them all.
///
/// Every thread runs to completion. The first failure recorded is returned;
/// later ones are only logged.
pub fn start_in_parallel(
    orchestrator: &NodeLifecycleOrchestrator,
    nodes: Vec<(String, u16)>,
    parameters: &Parameters,
) -> Result<(), Error> {
    let first_error: Arc<Mutex<Option<(String, Error)>>> = Arc::new(Mutex::new(None));

    let mut handles = Vec::with_capacity(nodes.len());

    for (node, admin_port) in nodes {
        let orchestrator = orchestrator.clone();
        let parameters = parameters.clone();
        let thread_error = first_error.clone();
        let thread_node = node.clone();

        let spawned = thread::Builder::new()
            .name(format!("start-{node}"))
            .spawn(move || {
                let result = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| Error::Io("Failed to build start runtime", e))
                    .and_then(|runtime| {
                        runtime.block_on(orchestrator.start_node_by_admin_port(
                            &thread_node,
                            admin_port,
                            parameters,
                        ))
                    });

                if let Err(error) = result {
                    record(&thread_error, thread_node, error);
                }
            });

        match spawned {
            Ok(handle) => handles.push((node, handle)),
            Err(e) => record(
                &first_error,
                node,
                Error::Io("Failed to spawn start thread", e),
            ),
        }
    }

    for (node, handle) in handles {
        if handle.join().is_err() {
            record(&first_error, node.clone(), Error::StartThread(node));
        }
    }

    let first = first_error.lock().take();
    match first {
        Some((node, error)) => Err(Error::StartNodes {
            node,
            source: Box::new(error),
        }),
        None => Ok(()),
    }
}

fn record(first_error: &Mutex<Option<(String, Error)>>, node: String, error: Error) {
    warn!("Start node on {} failed: {}", node, error);

    let mut slot = first_error.lock();
    if slot.is_none() {
        *slot = Some((node, error));
    } else {
        debug!("Start node on {} failed after an earlier failure", node);
    }
}
