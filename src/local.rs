//! `LocalLink`: an in-process reference transport over `crossbeam-channel`.
//!
//! Concrete transports (MPI, subprocess pipes, TCP) are out of scope per
//! the core spec; this implementation exists so the coordinator is
//! testable end to end without a real cluster, and so the bundled CLI has
//! something to run against by default. It satisfies the `WorkerLink`
//! contract exactly: one unbounded channel per direction, giving FIFO
//! delivery within a link and no ordering promise across links.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::{EnsembleError, EnsembleResult};
use crate::link::{Payload, WorkerLink};
use crate::types::{Tag, WorkerId};

/// The manager-side half of a link: sends orders/signals, receives results.
pub struct LocalManagerLink {
    worker: WorkerId,
    tx: Sender<(Tag, Payload)>,
    rx: Receiver<(Tag, Payload)>,
}

/// The worker-side half of the same link, with directions swapped.
pub struct LocalWorkerLink {
    tx: Sender<(Tag, Payload)>,
    rx: Receiver<(Tag, Payload)>,
}

/// Construct one manager/worker link pair for `worker`.
pub fn link_pair(worker: WorkerId) -> (LocalManagerLink, LocalWorkerLink) {
    let (to_worker_tx, to_worker_rx) = crossbeam_channel::unbounded();
    let (to_manager_tx, to_manager_rx) = crossbeam_channel::unbounded();
    (
        LocalManagerLink {
            worker,
            tx: to_worker_tx,
            rx: to_manager_rx,
        },
        LocalWorkerLink {
            tx: to_manager_tx,
            rx: to_worker_rx,
        },
    )
}

impl WorkerLink for LocalManagerLink {
    fn send(&self, tag: Tag, payload: Payload) -> EnsembleResult<()> {
        self.tx
            .send((tag, payload))
            .map_err(|e| EnsembleError::Transport(self.worker, e.to_string()))
    }

    fn mail_flag(&self) -> bool {
        !self.rx.is_empty()
    }

    fn recv(&self) -> EnsembleResult<(Tag, Payload)> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(msg),
            Err(TryRecvError::Empty) => {
                // mail_flag already confirmed readiness under the
                // single-threaded polling discipline (§5); a race here
                // means the remote end hung up mid-send.
                Err(EnsembleError::Transport(
                    self.worker,
                    "recv called with no message ready".into(),
                ))
            }
            Err(TryRecvError::Disconnected) => Err(EnsembleError::Transport(
                self.worker,
                "worker link disconnected".into(),
            )),
        }
    }
}

impl LocalWorkerLink {
    pub fn send(&self, tag: Tag, payload: Payload) -> EnsembleResult<()> {
        self.tx
            .send((tag, payload))
            .map_err(|e| EnsembleError::Transport(WorkerId::MANAGER, e.to_string()))
    }

    /// Blocking receive used by the reference worker loop: a worker thread
    /// has nothing better to do than wait for its next order.
    pub fn recv_blocking(&self) -> EnsembleResult<(Tag, Payload)> {
        self.rx
            .recv()
            .map_err(|e| EnsembleError::Transport(WorkerId::MANAGER, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_flag_reflects_pending_messages() {
        let (manager, worker) = link_pair(WorkerId(1));
        assert!(!manager.mail_flag());
        worker.send(Tag::WorkerDone, Payload::Signal).unwrap();
        assert!(manager.mail_flag());
        let (tag, _) = manager.recv().unwrap();
        assert_eq!(tag, Tag::WorkerDone);
        assert!(!manager.mail_flag());
    }

    #[test]
    fn fifo_within_one_link() {
        let (manager, worker) = link_pair(WorkerId(1));
        worker.send(Tag::WorkerDone, Payload::Signal).unwrap();
        worker.send(Tag::JobFailed, Payload::Signal).unwrap();
        let (first, _) = manager.recv().unwrap();
        let (second, _) = manager.recv().unwrap();
        assert_eq!(first, Tag::WorkerDone);
        assert_eq!(second, Tag::JobFailed);
    }

    #[test]
    fn recv_before_mail_flag_is_a_transport_error() {
        let (manager, _worker) = link_pair(WorkerId(2));
        assert!(manager.recv().is_err());
    }
}
