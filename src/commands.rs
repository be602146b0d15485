use crate::error::{RendererError, Result};
use crate::fence::Fence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    /// Nothing recorded; ready for `reset`.
    Idle,
    Recording,
    /// Recording finished; ready for `execute`.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListOp {
    Reset,
    Record,
    Close,
    Execute,
}

impl ListOp {
    fn name(self) -> &'static str {
        match self {
            ListOp::Reset => "reset",
            ListOp::Record => "record",
            ListOp::Close => "close",
            ListOp::Execute => "execute",
        }
    }
}

impl ListState {
    fn apply(self, op: ListOp) -> Result<ListState> {
        let (expected, next) = match op {
            ListOp::Reset => (ListState::Idle, ListState::Recording),
            ListOp::Record => (ListState::Recording, ListState::Recording),
            ListOp::Close => (ListState::Recording, ListState::Closed),
            ListOp::Execute => (ListState::Closed, ListState::Idle),
        };
        if self != expected {
            return Err(RendererError::CommandListState {
                op: op.name(),
                expected,
                actual: self,
            });
        }
        Ok(next)
    }
}

/// The single command list of the backend.
///
/// Recording goes `reset -> encoder()* -> close -> execute`. Any other order
/// is an error, as is a `reset` while work from the previous `execute` has
/// not been fenced to completion.
pub struct CommandList {
    label: &'static str,
    state: ListState,
    encoder: Option<wgpu::CommandEncoder>,
    closed: Option<wgpu::CommandBuffer>,
}

impl CommandList {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            state: ListState::Idle,
            encoder: None,
            closed: None,
        }
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn reset(&mut self, device: &wgpu::Device, fence: &Fence) -> Result<()> {
        if !fence.is_idle() {
            return Err(RendererError::CommandListInFlight {
                completed: fence.completed_value(),
                signaled: fence.last_signaled(),
            });
        }
        self.state = self.state.apply(ListOp::Reset)?;
        self.encoder = Some(device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(self.label),
        }));
        Ok(())
    }

    /// Encoder for the open recording.
    pub fn encoder(&mut self) -> Result<&mut wgpu::CommandEncoder> {
        self.state.apply(ListOp::Record)?;
        self.encoder.as_mut().ok_or(RendererError::CommandListState {
            op: ListOp::Record.name(),
            expected: ListState::Recording,
            actual: self.state,
        })
    }

    pub fn close(&mut self) -> Result<()> {
        let next = self.state.apply(ListOp::Close)?;
        if let Some(encoder) = self.encoder.take() {
            self.closed = Some(encoder.finish());
        }
        self.state = next;
        Ok(())
    }

    pub fn execute(&mut self, queue: &wgpu::Queue) -> Result<wgpu::SubmissionIndex> {
        let next = self.state.apply(ListOp::Execute)?;
        let buffer = self.closed.take();
        self.state = next;
        Ok(queue.submit(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ops: &[ListOp]) -> Result<ListState> {
        ops.iter()
            .try_fold(ListState::Idle, |state, op| state.apply(*op))
    }

    #[test]
    fn full_cycle_returns_to_idle() {
        let ops = [
            ListOp::Reset,
            ListOp::Record,
            ListOp::Record,
            ListOp::Close,
            ListOp::Execute,
        ];
        assert_eq!(run(&ops).unwrap(), ListState::Idle);
        // twice in a row
        let twice: Vec<_> = ops.iter().chain(ops.iter()).copied().collect();
        assert_eq!(run(&twice).unwrap(), ListState::Idle);
    }

    #[test]
    fn reset_while_recording_fails() {
        let err = run(&[ListOp::Reset, ListOp::Reset]).unwrap_err();
        match err {
            RendererError::CommandListState { op, actual, .. } => {
                assert_eq!(op, "reset");
                assert_eq!(actual, ListState::Recording);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn execute_requires_close() {
        assert!(run(&[ListOp::Reset, ListOp::Execute]).is_err());
        assert!(run(&[ListOp::Execute]).is_err());
    }

    #[test]
    fn record_outside_recording_fails() {
        assert!(run(&[ListOp::Record]).is_err());
        assert!(run(&[ListOp::Reset, ListOp::Close, ListOp::Record]).is_err());
    }
}
