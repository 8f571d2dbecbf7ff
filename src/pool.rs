//! A small fixed-size worker pool executing `Session::handle` calls in
//! callback or future mode.
//!
//! Grounded in the teacher's own concurrency idioms: `thread::spawn` drives
//! per-connection work in `router::Router::listen`, and `futures::channel::
//! oneshot` is the `Complete<T>` pattern `client.rs` uses to hand a result
//! back across a thread boundary. `WorkerPool` combines both into a
//! conventional fixed-worker-count pool (`submit` returning a future,
//! `submit_with_callback` taking a completion closure) rather than spawning
//! one thread per call the way the teacher's listener loop does, since the
//! session spec assumes a bounded, reusable pool (§5).

use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use futures::channel::oneshot;
use log::trace;

use crate::error::WampResult;
use crate::messages::Message;
use crate::session::Session;

/// Default worker count, per the concurrency model's "fixed-size (default 10)".
pub const DEFAULT_POOL_SIZE: usize = 10;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Task {
    Execute(Job),
    Shutdown,
}

/// A fixed-size pool of worker threads, each running `Session::handle` calls
/// submitted to it.
pub struct WorkerPool {
    sender: mpsc::Sender<Task>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads sharing a single job queue. `size` must be
    /// at least 1.
    pub fn new(size: usize) -> WorkerPool {
        assert!(size > 0, "a worker pool needs at least one worker");
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            workers.push(thread::spawn(move || loop {
                let task = receiver.lock().unwrap().recv();
                match task {
                    Ok(Task::Execute(job)) => {
                        trace!("worker pool: worker {} running a job", id);
                        job();
                    }
                    Ok(Task::Shutdown) | Err(_) => break,
                }
            }));
        }
        WorkerPool { sender, workers }
    }

    /// Deferred/callback mode: `session.handle(message, None)` runs on a
    /// worker thread; `on_done` is invoked with its result from that thread
    /// once it completes. The message's own response, if any, is still
    /// delivered via the session's `send_wamp_message` hook from inside the
    /// handler, exactly as in synchronous mode.
    pub fn submit_with_callback<F>(&self, session: Arc<Session>, message: Message, on_done: F)
    where
        F: FnOnce(WampResult<()>) + Send + 'static,
    {
        let job: Job = Box::new(move || {
            let result = session.handle(message, None);
            on_done(result);
        });
        self.sender
            .send(Task::Execute(job))
            .expect("worker pool has no live workers to receive this job");
    }

    /// Future mode: returns a receiver that resolves to `session.handle`'s
    /// result once a worker has run it.
    pub fn submit(&self, session: Arc<Session>, message: Message) -> oneshot::Receiver<WampResult<()>> {
        let (complete, receiver) = oneshot::channel();
        self.submit_with_callback(session, message, move |result| {
            let _ = complete.send(result);
        });
        receiver
    }
}

impl Default for WorkerPool {
    fn default() -> WorkerPool {
        WorkerPool::new(DEFAULT_POOL_SIZE)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Task::Shutdown);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::WeakCallable;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn fresh_bus(tag: &str) -> Arc<crate::pubsub::PubSubBus> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        crate::pubsub::PubSubBus::named(format!("pool-test-{}-{}", tag, COUNTER.fetch_add(1, Ordering::SeqCst)))
    }

    struct Sink {
        sent: StdMutex<Vec<Message>>,
    }

    impl Sink {
        fn new() -> Arc<Sink> {
            Arc::new(Sink { sent: StdMutex::new(Vec::new()) })
        }
        fn record(&self, message: Message) {
            self.sent.lock().unwrap().push(message);
        }
    }

    #[test]
    fn submit_with_callback_runs_handle_and_reports_completion() {
        let pool = WorkerPool::new(2);
        let session = Session::with_bus(fresh_bus("callback"));
        let sink = Sink::new();
        session.set_send_wamp_message(WeakCallable::bound(&sink, Sink::record));
        session.register_procedure(
            "echo",
            WeakCallable::unbound(|mut args: Vec<Value>| -> crate::session::ProcedureResult {
                Ok(args.pop().unwrap_or(Value::Null))
            }),
        );

        let (done_tx, done_rx) = mpsc::channel();
        pool.submit_with_callback(session, Message::call("c1", "echo", vec![Value::from(1)]), move |result| {
            done_tx.send(result).unwrap();
        });

        done_rx.recv().unwrap().unwrap();
        assert_eq!(sink.sent.lock().unwrap()[0], Message::call_result("c1", Value::from(1)));
    }

    #[test]
    fn submit_resolves_its_future_after_the_handler_completes() {
        let pool = WorkerPool::new(1);
        let session = Session::with_bus(fresh_bus("future"));
        let sink = Sink::new();
        session.set_send_wamp_message(WeakCallable::bound(&sink, Sink::record));

        let receiver = pool.submit(session, Message::prefix("p", "http://example.com/#"));
        let result = futures::executor::block_on(receiver).unwrap();
        result.unwrap();
    }
}
