use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{RendererError, Result};

/// Cooperative cancellation for a blocking fence wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Monotonic CPU/GPU synchronization counter.
///
/// `signal` hands the queue a new target value; the value becomes completed
/// once the queue reports every submission made before it as done.
pub struct Fence {
    next_value: u64,
    last_signaled: u64,
    completed: Arc<AtomicU64>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Fence {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            next_value: 1,
            last_signaled: 0,
            completed: Arc::new(AtomicU64::new(0)),
            timeout,
            poll_interval,
        }
    }

    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    pub fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// True when every signaled value has completed.
    pub fn is_idle(&self) -> bool {
        self.completed_value() >= self.last_signaled
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn reserve(&mut self) -> u64 {
        let value = self.next_value;
        self.next_value += 1;
        self.last_signaled = value;
        value
    }

    /// Pushes a new target value behind all work submitted so far.
    pub fn signal(&mut self, queue: &wgpu::Queue) -> u64 {
        let value = self.reserve();
        let completed = Arc::clone(&self.completed);
        queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        log::trace!("fence signal {value}");
        value
    }

    /// Blocks until the last signaled value completes.
    pub fn wait_idle(&self, device: &wgpu::Device, cancel: &CancelToken) -> Result<()> {
        self.wait(device, self.last_signaled, cancel)
    }

    /// Blocks until `value` completes, the configured timeout elapses, or
    /// `cancel` fires.
    pub fn wait(&self, device: &wgpu::Device, value: u64, cancel: &CancelToken) -> Result<()> {
        self.wait_with(value, cancel, || {
            device.poll(wgpu::PollType::Poll)?;
            Ok(())
        })
    }

    fn wait_with(
        &self,
        value: u64,
        cancel: &CancelToken,
        mut poll: impl FnMut() -> Result<()>,
    ) -> Result<()> {
        if value > self.last_signaled {
            return Err(RendererError::FenceNotSignaled {
                value,
                signaled: self.last_signaled,
            });
        }

        let start = Instant::now();
        loop {
            if self.completed_value() >= value {
                return Ok(());
            }
            if cancel.is_cancelled() {
                log::warn!("fence wait for {value} cancelled");
                return Err(RendererError::FenceCancelled { value });
            }

            poll()?;
            if self.completed_value() >= value {
                return Ok(());
            }

            if start.elapsed() >= self.timeout {
                let completed = self.completed_value();
                log::error!(
                    "fence wait for {value} timed out after {:?} (completed {completed})",
                    self.timeout
                );
                return Err(RendererError::FenceTimeout {
                    value,
                    completed,
                    timeout: self.timeout,
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
