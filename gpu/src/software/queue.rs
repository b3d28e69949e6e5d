//! The software device's command queue: one worker thread draining a FIFO
//! channel, so dispatches execute strictly in submission order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, trace};

use super::invocation::{KernelInvocation, SlotData};
use super::SoftwareBuffer;
use crate::completion::CompletionSignal;
use crate::error::{DispatchError, Result};
use crate::grid::{DispatchGrid, Extent3};
use crate::kernel::{BindingSlot, HostKernelFn};

/// One encoded dispatch waiting for the worker.
pub(crate) struct Job {
    pub(crate) label: String,
    pub(crate) submission: u64,
    pub(crate) body: Arc<HostKernelFn>,
    pub(crate) bindings: Vec<(BindingSlot, SoftwareBuffer)>,
    pub(crate) grid: DispatchGrid,
    pub(crate) signal: CompletionSignal,
}

pub(crate) struct WorkQueue {
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    enqueued: AtomicU64,
    executed: Arc<AtomicU64>,
}

impl WorkQueue {
    pub(crate) fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let executed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&executed);
        let worker = thread::Builder::new()
            .name(format!("{}-queue", name))
            .spawn(move || drain(receiver, counter))
            .map_err(|e| DispatchError::DeviceUnavailable(format!("queue thread: {}", e)))?;

        Ok(WorkQueue {
            sender: Some(sender),
            worker: Some(worker),
            enqueued: AtomicU64::new(0),
            executed,
        })
    }

    pub(crate) fn push(&self, job: Job) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| DispatchError::Submission("queue is shut down".to_string()))?;
        // A send error hands the job back; dropping it fails the token.
        sender
            .send(job)
            .map_err(|_| DispatchError::Submission("queue worker has exited".to_string()))?;
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub(crate) fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                debug!("software queue worker panicked during shutdown");
            }
        }
    }
}

fn drain(receiver: Receiver<Job>, executed: Arc<AtomicU64>) {
    for job in receiver {
        execute(job);
        executed.fetch_add(1, Ordering::Release);
    }
}

fn execute(job: Job) {
    let Job {
        label,
        submission,
        body,
        bindings,
        grid,
        signal,
    } = job;
    trace!(
        "software queue: running '{}' (submission {}, {} groups)",
        label,
        submission,
        grid.groups.volume()
    );

    // Take the bytes out of each buffer for the duration of the dispatch;
    // leases keep the host away until the signal fires.
    let mut slots: Vec<SlotData> = bindings
        .iter()
        .map(|(slot, buffer)| SlotData {
            slot: *slot,
            bytes: std::mem::take(&mut *buffer.bytes.lock()),
        })
        .collect();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_grid(&*body, &grid, &mut slots)));

    for ((_, buffer), data) in bindings.iter().zip(slots) {
        *buffer.bytes.lock() = data.bytes;
    }

    match outcome {
        Ok(Ok(())) => signal.complete(),
        Ok(Err(reason)) => signal.fail(reason),
        Err(payload) => signal.fail(format!("kernel panicked: {}", panic_message(&*payload))),
    }
}

fn run_grid(
    body: &HostKernelFn,
    grid: &DispatchGrid,
    slots: &mut [SlotData],
) -> std::result::Result<(), String> {
    let groups = grid.groups;
    let size = grid.group_size;
    let threads_per_grid = Extent3::new(
        groups.width * size.width,
        groups.height * size.height,
        groups.depth * size.depth,
    );

    for gz in 0..groups.depth {
        for gy in 0..groups.height {
            for gx in 0..groups.width {
                let group = Extent3::new(gx, gy, gz);
                for tz in 0..size.depth {
                    for ty in 0..size.height {
                        for tx in 0..size.width {
                            let thread = Extent3::new(tx, ty, tz);
                            let mut invocation =
                                KernelInvocation::new(group, thread, size, threads_per_grid, slots);
                            body(&mut invocation).map_err(|reason| {
                                format!(
                                    "thread {:?}: {}",
                                    invocation.thread_position_in_grid().to_array(),
                                    reason
                                )
                            })?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
