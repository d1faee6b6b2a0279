use std::fmt;
use std::future::{poll_fn, Future};
use std::sync::{Arc, OnceLock};
use std::task::Poll;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::logger::Logger;

static LOGGER: std::sync::LazyLock<Logger> =
    std::sync::LazyLock::new(|| Logger::new("@firebase/database-runtime"));

/// A unit of asynchronous work handed to the host scheduler.
pub type Task = BoxFuture<'static, ()>;

/// The host's "spawn and forget" primitive.
///
/// Implementations must start tasks in the order they were spawned. Completion order is
/// only preserved for tasks that do not suspend; anything awaiting I/O may finish later than
/// a task spawned after it.
pub trait TaskScheduler: Send + Sync {
    fn spawn(&self, task: Task);
}

/// Runs every task through a single dispatcher task on the ambient Tokio runtime, or on a
/// background runtime thread when first used outside any runtime.
///
/// The dispatcher polls tasks for the first time in the order they were spawned, on any
/// runtime flavour. Tasks interleave at their await points but never run in parallel with
/// each other. Clones share the dispatcher.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
    queue: Arc<OnceLock<UnboundedSender<Task>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the dispatcher to a specific runtime instead of the one current at first spawn.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
            queue: Arc::default(),
        }
    }

    fn start_dispatcher(&self) -> UnboundedSender<Task> {
        let (sender, receiver) = mpsc::unbounded_channel();
        match &self.handle {
            Some(handle) => {
                handle.spawn(dispatch(receiver));
            }
            None => spawn_detached(dispatch(receiver)),
        }
        sender
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pinned", &self.handle.is_some())
            .field("started", &self.queue.get().is_some())
            .finish()
    }
}

impl TaskScheduler for TokioScheduler {
    fn spawn(&self, task: Task) {
        let queue = self.queue.get_or_init(|| self.start_dispatcher());
        if queue.send(task).is_err() {
            LOGGER.error("task dispatcher has stopped; dropping task");
        }
    }
}

/// Drains `receiver` in order, driving the received tasks concurrently until the queue is
/// closed and every task has finished.
async fn dispatch(mut receiver: UnboundedReceiver<Task>) {
    let mut running = FuturesUnordered::new();
    let mut closed = false;
    poll_fn(|cx| {
        while !closed {
            match receiver.poll_recv(cx) {
                Poll::Ready(Some(task)) => running.push(task),
                Poll::Ready(None) => closed = true,
                Poll::Pending => break,
            }
        }
        while let Poll::Ready(Some(())) = running.poll_next_unpin(cx) {}
        if closed && running.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    })
    .await
}

/// Returns the process-wide default scheduler.
pub fn default_scheduler() -> Arc<dyn TaskScheduler> {
    Arc::new(TokioScheduler::new())
}

/// Platform-independent helper to spawn an async task that runs in the background.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
        return;
    }

    match background_handle() {
        Some(handle) => {
            handle.spawn(future);
        }
        None => LOGGER.error("no background runtime available; dropping task"),
    }
}

fn background_handle() -> Option<&'static Handle> {
    static BACKGROUND: OnceLock<Option<Handle>> = OnceLock::new();
    BACKGROUND
        .get_or_init(|| {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    LOGGER.error(format!("failed to build background tokio runtime: {err}"));
                    return None;
                }
            };
            let handle = runtime.handle().clone();
            let spawned = std::thread::Builder::new()
                .name("rtdb-background".into())
                .spawn(move || runtime.block_on(std::future::pending::<()>()));
            match spawned {
                Ok(_) => Some(handle),
                Err(err) => {
                    LOGGER.error(format!("failed to start background runtime thread: {err}"));
                    None
                }
            }
        })
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn current_thread_scheduler_starts_tasks_in_enqueue_order() {
        let scheduler = TokioScheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        for index in 0..10 {
            let order = order.clone();
            let done_tx = done_tx.clone();
            scheduler.spawn(Box::pin(async move {
                order.lock().unwrap().push(index);
                if index == 9 {
                    if let Some(tx) = done_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                }
            }));
        }

        done_rx.await.unwrap();
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn multi_thread_scheduler_starts_tasks_in_enqueue_order() {
        let scheduler = TokioScheduler::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for index in 0..500 {
            let tx = tx.clone();
            scheduler.spawn(Box::pin(async move {
                let _ = tx.send(index);
            }));
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(index) = rx.recv().await {
            order.push(index);
        }
        assert_eq!(order, (0..500).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn suspended_tasks_do_not_block_later_ones() {
        let scheduler = TokioScheduler::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        let first_done = done_tx.clone();
        scheduler.spawn(Box::pin(async move {
            let _ = release_rx.await;
            let _ = first_done.send("first");
        }));
        scheduler.spawn(Box::pin(async move {
            let _ = done_tx.send("second");
            let _ = release_tx.send(());
        }));

        assert_eq!(done_rx.recv().await, Some("second"));
        assert_eq!(done_rx.recv().await, Some("first"));
    }

    #[test]
    fn spawn_detached_runs_without_ambient_runtime() {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_detached(async move {
            tx.send(42).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
