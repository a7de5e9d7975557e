//! Frame lifecycle state machine.
//!
//! ```text
//! Ready -> Recording -> Submitted -> Presented -> Recording -> ... -> TornDown
//! ```
//!
//! A skipped frame (the swapchain stayed stale) leaves the state unchanged.

use crate::error::{RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Constructed, no frame begun yet.
    Ready,
    /// Command buffer open; draws may be recorded.
    Recording,
    /// Command buffer handed to the queue.
    Submitted,
    /// Image queued for display.
    Presented,
    /// Resources destroyed.
    TornDown,
}

/// Tracks the current [`FrameState`] and validates transitions.
#[derive(Debug, Clone)]
pub struct FrameCycle {
    state: FrameState,
    frames_rendered: u64,
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCycle {
    pub fn new() -> Self {
        Self {
            state: FrameState::Ready,
            frames_rendered: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Number of presented frames.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    fn invalid(&self, operation: &'static str) -> RenderError {
        RenderError::InvalidTransition {
            operation,
            state: self.state,
        }
    }

    /// Check that a frame can begin, without changing state.
    pub fn check_begin(&self) -> Result<()> {
        match self.state {
            FrameState::Ready | FrameState::Presented => Ok(()),
            _ => Err(self.invalid("begin")),
        }
    }

    pub fn begin(&mut self) -> Result<()> {
        self.check_begin()?;
        self.state = FrameState::Recording;
        Ok(())
    }

    /// Check that draw commands may be recorded.
    pub fn check_recording(&self, operation: &'static str) -> Result<()> {
        match self.state {
            FrameState::Recording => Ok(()),
            _ => Err(self.invalid(operation)),
        }
    }

    pub fn submit(&mut self) -> Result<()> {
        self.check_recording("submit")?;
        self.state = FrameState::Submitted;
        Ok(())
    }

    pub fn present(&mut self) -> Result<()> {
        match self.state {
            FrameState::Submitted => {
                self.state = FrameState::Presented;
                self.frames_rendered += 1;
                Ok(())
            }
            _ => Err(self.invalid("present")),
        }
    }

    /// Resizing is allowed between frames only.
    pub fn check_idle(&self, operation: &'static str) -> Result<()> {
        match self.state {
            FrameState::Ready | FrameState::Presented => Ok(()),
            _ => Err(self.invalid(operation)),
        }
    }

    pub fn check_alive(&self, operation: &'static str) -> Result<()> {
        match self.state {
            FrameState::TornDown => Err(self.invalid(operation)),
            _ => Ok(()),
        }
    }

    pub fn tear_down(&mut self) {
        self.state = FrameState::TornDown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_cycle() {
        let mut cycle = FrameCycle::new();
        for _ in 0..3 {
            cycle.begin().unwrap();
            cycle.check_recording("draw").unwrap();
            cycle.submit().unwrap();
            cycle.present().unwrap();
        }
        assert_eq!(cycle.state(), FrameState::Presented);
        assert_eq!(cycle.frames_rendered(), 3);
    }

    #[test]
    fn submit_before_begin_is_rejected() {
        let mut cycle = FrameCycle::new();
        let err = cycle.submit().unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidTransition {
                operation: "submit",
                state: FrameState::Ready
            }
        ));
        assert_eq!(cycle.state(), FrameState::Ready);
    }

    #[test]
    fn double_begin_is_rejected() {
        let mut cycle = FrameCycle::new();
        cycle.begin().unwrap();
        assert!(cycle.begin().is_err());
        assert_eq!(cycle.state(), FrameState::Recording);
    }

    #[test]
    fn present_requires_submit() {
        let mut cycle = FrameCycle::new();
        cycle.begin().unwrap();
        assert!(cycle.present().is_err());
        assert_eq!(cycle.frames_rendered(), 0);
    }

    #[test]
    fn draws_only_while_recording() {
        let mut cycle = FrameCycle::new();
        assert!(cycle.check_recording("draw").is_err());
        cycle.begin().unwrap();
        cycle.submit().unwrap();
        assert!(cycle.check_recording("draw").is_err());
    }

    #[test]
    fn resize_only_between_frames() {
        let mut cycle = FrameCycle::new();
        cycle.check_idle("resize").unwrap();
        cycle.begin().unwrap();
        assert!(cycle.check_idle("resize").is_err());
    }

    #[test]
    fn torn_down_rejects_everything() {
        let mut cycle = FrameCycle::new();
        cycle.tear_down();
        assert!(cycle.begin().is_err());
        assert!(cycle.check_alive("wait").is_err());
    }
}
