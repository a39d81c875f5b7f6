//! The worker-link abstraction: a bidirectional, ordered, typed message
//! channel between the manager and one worker, abstracted over the
//! concrete transport (§4.3). Concrete transports (MPI, subprocess pipes,
//! TCP) are out of scope; only the contract and one in-process reference
//! implementation (`local::LocalLink`) live here.

use serde::{Deserialize, Serialize};

use crate::alloc::WorkOrder;
use crate::error::EnsembleResult;
use crate::history::HistorySlice;
use crate::persis_info::PersisInfo;
use crate::types::{CalcType, CalcStatus, Tag, WorkerId};

/// `libE_info` as reported *by* a worker alongside a result (as opposed to
/// the one the allocator attaches *to* a work order, `LibeInfoOut` in
/// `alloc.rs`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibeInfoIn {
    pub persistent: bool,
    pub blocking: Option<Vec<WorkerId>>,
}

/// The payload dictionary a worker sends back describing one completed
/// calculation (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub calc_type: CalcType,
    pub calc_status: CalcStatus,
    pub calc_out: Option<HistorySlice>,
    pub libe_info: Option<LibeInfoIn>,
    pub persis_info: Option<PersisInfo>,
}

/// Every message body that can cross a worker link in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    /// Manager → worker: a work order.
    Order(WorkOrder),
    /// Manager → worker (immediately following `Order` when rows is
    /// non-empty), or worker → manager on `REQ_PICKLE_DUMP` retry: the
    /// columnar data slice.
    Data(HistorySlice),
    /// Worker → manager: a completed calculation.
    Result(WorkerMessage),
    /// Worker → manager, reply to `ManSignalReqPickleDump`: where the
    /// dumped payload was written.
    SnapshotPath(String),
    /// Manager → worker: a bare signal with no payload (finish, kill,
    /// resend/pickle-dump requests).
    Signal,
}

/// Contract for a single manager↔worker duplex channel (§4.3).
///
/// Implementations must guarantee FIFO, reliable, in-order delivery within
/// one link; no ordering is promised (or required) across distinct links.
pub trait WorkerLink: Send {
    /// Enqueue `(tag, payload)` for delivery. Must not block indefinitely.
    fn send(&self, tag: Tag, payload: Payload) -> EnsembleResult<()>;

    /// Non-blocking: is at least one message available to receive?
    fn mail_flag(&self) -> bool;

    /// Return the next `(tag, payload)`. Only ever called after
    /// `mail_flag` has returned `true`; may still fail with a transport
    /// error (§7 kind 4).
    fn recv(&self) -> EnsembleResult<(Tag, Payload)>;
}
