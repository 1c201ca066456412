//! Worker pool executing deferred send/recv closures for async requests.

use crate::error::Result;
use crate::prelude::*;
use crossbeam::channel::{unbounded, Sender};
use cumulus_core::future::{Future, Promise};
use std::thread::JoinHandle;

pub(crate) type RequestClosure = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

type RequestTuple = (u64, RequestClosure, Promise<Result<()>>);

/// Fixed pool of worker threads draining a shared request queue.
///
/// Each entry carries a request id, the blocking closure to run, and the
/// promise resolving the completion future handed back to the issuer.
/// Closures are expected to block (on local queues or the transport), so
/// the pool is sized against the usable cores.
pub(crate) struct AsyncThreadPool {
    sender: Option<Sender<RequestTuple>>,
    workers: Vec<JoinHandle<()>>,
}

impl AsyncThreadPool {
    pub fn new(n_threads: usize) -> Self {
        let (sender, receiver) = unbounded::<RequestTuple>();

        let mut workers = Vec::with_capacity(n_threads);
        for idx in 0..n_threads {
            let receiver = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("mpi-request-{}", idx))
                .spawn(move || {
                    for (request_id, closure, promise) in receiver.iter() {
                        trace!("request worker {} running {}", idx, request_id);
                        promise.complete(closure());
                    }
                    trace!("request worker {} shutting down", idx);
                })
                .expect("failed to launch new thread");

            workers.push(handle);
        }

        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Enqueue a request and return the future its completion resolves.
    pub fn submit(&self, request_id: u64, closure: RequestClosure) -> Future<Result<()>> {
        let (promise, future) = Promise::new();

        if let Some(sender) = &self.sender {
            if sender.send((request_id, closure, promise)).is_err() {
                warn!("request pool is shut down, dropping request {}", request_id);
            }
        }

        future
    }
}

impl Drop for AsyncThreadPool {
    fn drop(&mut self) {
        // Close the queue; workers drain what is left and exit.
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
