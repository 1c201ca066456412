//! The scheduler seam consumed by worlds and executors.

use crate::prelude::*;
use crate::types::Message;
use cumulus_core::queue::Queue;
use std::sync::Arc;

/// Interface to the outer function scheduler.
///
/// A world uses it to dispatch bootstrap invocations for the non-master
/// ranks; executors use it to pick up those invocations and report results.
pub trait Scheduler: Send + Sync {
    /// Dispatch one invocation for execution somewhere in the system.
    fn call_function(&self, msg: Message);

    /// Queue of pending invocations for the function `msg` names.
    fn get_function_queue(&self, msg: &Message) -> Arc<Queue<Message>>;

    /// Queue unbound executors listen to for their first function.
    fn get_bind_queue(&self) -> Arc<Queue<Message>>;

    /// Record that an invocation finished executing.
    fn notify_call_finished(&self, msg: &Message);

    /// Publish the result of a finished invocation.
    fn set_function_result(&self, msg: &Message);
}

/// Process-local scheduler keeping every queue in memory.
///
/// Dispatched calls are recorded so callers can assert on what was spawned.
#[derive(Default)]
pub struct InMemoryScheduler {
    bind_queue: Arc<Queue<Message>>,
    function_queues: Mutex<HashMap<String, Arc<Queue<Message>>>>,
    recorded_calls: Mutex<Vec<Message>>,
    finished_calls: Mutex<Vec<u64>>,
    results: Mutex<HashMap<u64, Message>>,
}

impl InMemoryScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every invocation passed to [`Scheduler::call_function`], in order.
    pub fn recorded_calls(&self) -> Vec<Message> {
        self.recorded_calls.lock().clone()
    }

    pub fn finished_calls(&self) -> Vec<u64> {
        self.finished_calls.lock().clone()
    }

    pub fn get_result(&self, call_id: u64) -> Option<Message> {
        self.results.lock().get(&call_id).cloned()
    }
}

impl Scheduler for InMemoryScheduler {
    fn call_function(&self, msg: Message) {
        debug!("scheduler - dispatch {}", msg.func_str());

        self.recorded_calls.lock().push(msg.clone());
        self.get_function_queue(&msg).enqueue(msg.clone());
        self.bind_queue.enqueue(msg);
    }

    fn get_function_queue(&self, msg: &Message) -> Arc<Queue<Message>> {
        let mut queues = self.function_queues.lock();
        Arc::clone(queues.entry(msg.func_str()).or_default())
    }

    fn get_bind_queue(&self) -> Arc<Queue<Message>> {
        Arc::clone(&self.bind_queue)
    }

    fn notify_call_finished(&self, msg: &Message) {
        debug!("scheduler - finished {}", msg.func_str());
        self.finished_calls.lock().push(msg.id);
    }

    fn set_function_result(&self, msg: &Message) {
        self.results.lock().insert(msg.id, msg.clone());
    }
}
