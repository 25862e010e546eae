use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{debug, error};

use crate::error::Error;
use crate::queue::QueueCore;
use crate::request::{DeliveryFn, QueuedRequest};

/// Executes delivery closures on a caller-designated thread.
///
/// Every success and error callback of every request runs through one
/// executor, so callers get the single-threaded delivery model they expect
/// from UI toolkits and event loops.
pub trait DeliveryExecutor: Send + Sync + 'static {
    /// Runs `task`, typically by posting it to another thread.
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs deliveries inline on the dispatcher thread that posted them.
///
/// Callbacks then execute on worker threads, which is fine for headless
/// batch work and tests but defeats the single-delivery-thread model.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateExecutor;

impl DeliveryExecutor for ImmediateExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// A [`DeliveryExecutor`] backed by one dedicated callback thread.
///
/// Tasks run strictly in posting order. Dropping the executor drains the
/// queue and joins the thread.
#[derive(Debug)]
pub struct SingleThreadExecutor {
    sender: Mutex<Option<Sender<Box<dyn FnOnce() + Send>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SingleThreadExecutor {
    /// Spawns the delivery thread.
    pub fn new() -> Self {
        let (sender, receiver) = channel::<Box<dyn FnOnce() + Send>>();
        let worker = std::thread::Builder::new()
            .name("response-delivery".into())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
                debug!("delivery thread exiting");
            })
            .expect("failed to spawn delivery thread");
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }
}

impl Default for SingleThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryExecutor for SingleThreadExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        let sender = self.sender.lock().expect("delivery executor poisoned");
        match sender.as_ref().map(|s| s.send(task)) {
            Some(Ok(())) => {}
            _ => error!("delivery executor is shut down; dropping callback"),
        }
    }
}

impl Drop for SingleThreadExecutor {
    fn drop(&mut self) {
        self.sender.lock().expect("delivery executor poisoned").take();
        if let Some(worker) =
            self.worker.lock().expect("delivery executor poisoned").take()
        {
            let _ = worker.join();
        }
    }
}

/// What happens to the request after its listener ran.
pub(crate) enum Followup {
    /// The response was final: notify the queue.
    Finish,
    /// The response came from a soft-expired cache entry: requeue onto the
    /// network queue for revalidation.
    Revalidate,
}

/// Posts deliver-then-finish closures onto the delivery executor.
///
/// The posted closure owns the request. On the executor thread it checks the
/// cancel flag (a request canceled after dispatch is finished without
/// invoking listeners), runs the listener closure, and then either finishes
/// the request or hands it back to the network queue for revalidation.
pub(crate) struct ExecutorDelivery {
    executor: Arc<dyn DeliveryExecutor>,
}

impl ExecutorDelivery {
    pub(crate) fn new(executor: Arc<dyn DeliveryExecutor>) -> Self {
        Self { executor }
    }

    pub(crate) fn post_response(
        &self,
        core: &Arc<QueueCore>,
        request: QueuedRequest,
        work: DeliveryFn,
        followup: Followup,
    ) {
        request.handle.mark_delivered();
        let core = Arc::clone(core);
        self.executor.execute(Box::new(move || {
            if request.handle.is_canceled() {
                core.finish(request, "canceled-at-delivery");
                return;
            }
            work();
            match followup {
                Followup::Finish => core.finish(request, "done"),
                Followup::Revalidate => {
                    debug!(
                        "requeuing {} for revalidation",
                        request.cache_key
                    );
                    core.network_queue.put(request);
                }
            }
        }));
    }

    pub(crate) fn post_error(
        &self,
        core: &Arc<QueueCore>,
        request: QueuedRequest,
        error: Error,
    ) {
        request.handle.mark_delivered();
        let work = request.handler.fail(error);
        let core = Arc::clone(core);
        self.executor.execute(Box::new(move || {
            if request.handle.is_canceled() {
                core.finish(request, "canceled-at-delivery");
                return;
            }
            work();
            core.finish(request, "done-with-error");
        }));
    }
}
