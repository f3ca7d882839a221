//! A single background thread running submitted tasks in FIFO order.
//!
//! Used to take expensive refreshes (statistics, mostly) off the thread
//! that appends events. Tasks must not block on each other.

use crate::error::{TraceError, TraceResult};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct TaskQueue {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Spawn the worker thread.
    pub fn start(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Task>();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            for task in receiver.iter() {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    log::error!("task on worker {} panicked", thread_name);
                }
            }
            log::debug!("worker {} drained", thread_name);
        })?;
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `task`. Fails once the queue has been shut down.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> TraceResult<()> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(TraceError::Worker(format!("{} is shut down", self.name)));
        };
        sender
            .send(Box::new(task))
            .map_err(|_| TraceError::Worker(format!("{} has exited", self.name)))
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting tasks, run what is already queued, then join.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("worker {} panicked", self.name);
            }
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
