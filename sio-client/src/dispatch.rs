//! The manager's single listener-dispatch task.
//!
//! Events for every namespace of a manager pass through one queue, so
//! listeners observe them in the order the I/O task produced them.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};

use sio_core::error::DispatchError;

use crate::events::Event;
use crate::socket::SocketShared;

pub(crate) struct DispatchJob {
    pub socket: Arc<SocketShared>,
    pub event: Event,
}

pub(crate) type DispatchTx = mpsc::UnboundedSender<DispatchJob>;

/// Run listeners until the I/O task drops its sender.
pub(crate) async fn run_dispatcher(
    mut jobs: mpsc::UnboundedReceiver<DispatchJob>,
    errors: broadcast::Sender<DispatchError>,
) {
    while let Some(job) = jobs.recv().await {
        for failure in job.socket.registry.dispatch(&job.event) {
            error!("{}", failure);
            let _ = errors.send(failure);
        }
    }
    debug!("dispatcher stopped");
}
