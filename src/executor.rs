//! Executor harness binding a worker thread to a function and draining its
//! invocation queue.

use crate::error::{MpiError, Result};
use crate::prelude::*;
use crate::types::Message;
use crate::world::WorldEnv;
use cumulus_core::queue::Queue;
use std::sync::Arc;

/// Handler invoked for each function call the executor picks up.
///
/// Returning an error whose root cause is [`MpiError::ExecutorFinished`]
/// stops the run loop cleanly.
pub type CallHandler = Box<dyn FnMut(&Message) -> anyhow::Result<()> + Send>;

pub struct Executor {
    id: String,
    env: WorldEnv,
    handler: CallHandler,

    bind_queue: Arc<Queue<Message>>,
    function_queue: Option<Arc<Queue<Message>>>,
    bound_message: Option<Message>,
    execution_count: usize,
}

impl Executor {
    pub fn new(thread_idx: usize, env: WorldEnv, handler: CallHandler) -> Self {
        let id = format!("{}_{}", env.config.endpoint_host, thread_idx);
        debug!("starting executor {}", id);

        let bind_queue = env.scheduler.get_bind_queue();
        Self {
            id,
            env,
            handler,
            bind_queue,
            function_queue: None,
            bound_message: None,
            execution_count: 0,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound_message.is_some()
    }

    pub fn execution_count(&self) -> usize {
        self.execution_count
    }

    /// Attach this executor to the function `msg` names.
    pub fn bind_to_function(&mut self, msg: &Message) -> Result<()> {
        if self.is_bound() {
            return Err(MpiError::AlreadyBound);
        }

        self.function_queue = Some(self.env.scheduler.get_function_queue(msg));
        self.bound_message = Some(msg.clone());
        Ok(())
    }

    /// Process invocations until the queue runs dry or the handler signals
    /// it is finished.
    pub fn run(&mut self) {
        loop {
            debug!("{} waiting for next message", self.id);
            match self.process_next_message() {
                Ok(()) => {}
                Err(MpiError::ExecutorFinished) => {
                    debug!("{} finished", self.id);
                    break;
                }
                Err(MpiError::QueueTimeout(_)) => {
                    // No message arrived in time, so die off.
                    debug!("{} got no messages, finishing", self.id);
                    break;
                }
                Err(e) => {
                    error!("{} dropping out: {}", self.id, e);
                    break;
                }
            }
        }
    }

    fn process_next_message(&mut self) -> Result<()> {
        if let Some(queue) = &self.function_queue {
            let msg = queue.dequeue_timeout(self.env.config.bound_timeout)?;
            self.execute_call(msg)
        } else {
            let bind_msg = self.bind_queue.dequeue_timeout(self.env.config.unbound_timeout)?;
            debug!("{} binding to {}", self.id, bind_msg.func_str());
            self.bind_to_function(&bind_msg)
        }
    }

    fn execute_call(&mut self, mut msg: Message) -> Result<()> {
        debug!("{} executing {}", self.id, msg.func_str());

        match (self.handler)(&msg) {
            Ok(()) => {}
            Err(e) => {
                if matches!(
                    e.downcast_ref::<MpiError>(),
                    Some(MpiError::ExecutorFinished)
                ) {
                    return Err(MpiError::ExecutorFinished);
                }

                error!("error executing {}: {}", msg.func_str(), e);
                msg.return_value = 1;
                msg.output_data = format!("Error: {}", e);
            }
        }

        // Notify before setting the result so callers awaiting the result
        // keep blocking until it is actually available.
        self.env.scheduler.notify_call_finished(&msg);
        self.env.scheduler.set_function_result(&msg);

        self.execution_count += 1;
        Ok(())
    }
}
