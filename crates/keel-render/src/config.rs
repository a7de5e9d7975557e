//! Renderer configuration.

pub use keel_gpu::RetentionPolicy;

/// Renderer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Frame slots that may be recorded while earlier ones execute.
    pub frames_in_flight: usize,
    /// When buffers referenced by draws are released.
    pub retention: RetentionPolicy,
    /// Acquire attempts (with a resize between each) before a frame is skipped.
    pub max_acquire_attempts: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            retention: RetentionPolicy::PerFrameFence,
            max_acquire_attempts: 3,
        }
    }
}

impl RendererConfig {
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_acquire_attempts(mut self, attempts: u32) -> Self {
        self.max_acquire_attempts = attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.retention, RetentionPolicy::PerFrameFence);
        assert_eq!(config.max_acquire_attempts, 3);
    }

    #[test]
    fn builders_clamp_to_one() {
        let config = RendererConfig::default()
            .with_frames_in_flight(0)
            .with_max_acquire_attempts(0)
            .with_retention(RetentionPolicy::IdleAfterSubmit);
        assert_eq!(config.frames_in_flight, 1);
        assert_eq!(config.max_acquire_attempts, 1);
        assert_eq!(config.retention, RetentionPolicy::IdleAfterSubmit);
    }
}
