//! Drawer configuration.

use std::time::Duration;

/// Configuration for a [`CommandDrawer`](crate::CommandDrawer).
///
/// # Example
///
/// ```
/// use redlilium_draw_commands::DrawConfig;
///
/// let config = DrawConfig::default()
///     .with_max_pixel_error(0.25)
///     .with_worker_threads(0); // run every job inline
/// assert_eq!(config.worker_threads, 0);
/// ```
#[derive(Debug, Clone)]
pub struct DrawConfig {
    /// Maximum screen-space deviation (in pixels) of tessellated curves.
    pub max_pixel_error: f32,
    /// Maximum nesting depth of each scope stack.
    pub max_stack_depth: usize,
    /// Upper bound on the number of segments of a full circle.
    pub max_circle_steps: u32,
    /// Minimum cosine between consecutive line directions for join welding.
    pub line_join_cos_threshold: f32,
    /// Initial capacity (bytes) of freshly allocated command buffers.
    pub initial_buffer_capacity: usize,
    /// Sanity ceiling for a single command buffer. Exceeding it panics.
    pub max_buffer_bytes: usize,
    /// Entries not refreshed for more than this many epochs are released.
    pub gc_epoch_slack: u64,
    /// Pooled buffers unused for this many epochs are trimmed.
    pub pool_trim_epochs: u64,
    /// Bounded wait for end-of-frame submission dependencies.
    pub end_of_frame_timeout: Duration,
    /// Number of background worker threads. `0` runs every job inline.
    pub worker_threads: usize,
}

impl Default for DrawConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            max_pixel_error: 0.5,
            max_stack_depth: 32,
            max_circle_steps: 512,
            line_join_cos_threshold: 0.866,
            initial_buffer_capacity: 4096,
            max_buffer_bytes: 1 << 30,
            gc_epoch_slack: 2,
            pool_trim_epochs: 60,
            end_of_frame_timeout: Duration::from_millis(100),
            worker_threads: cores.saturating_sub(1).max(1),
        }
    }
}

impl DrawConfig {
    pub fn with_max_pixel_error(mut self, pixels: f32) -> Self {
        self.max_pixel_error = pixels;
        self
    }

    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn with_max_circle_steps(mut self, steps: u32) -> Self {
        self.max_circle_steps = steps.max(3);
        self
    }

    pub fn with_line_join_cos_threshold(mut self, cos: f32) -> Self {
        self.line_join_cos_threshold = cos;
        self
    }

    pub fn with_initial_buffer_capacity(mut self, bytes: usize) -> Self {
        self.initial_buffer_capacity = bytes;
        self
    }

    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    pub fn with_gc_epoch_slack(mut self, epochs: u64) -> Self {
        self.gc_epoch_slack = epochs;
        self
    }

    pub fn with_pool_trim_epochs(mut self, epochs: u64) -> Self {
        self.pool_trim_epochs = epochs;
        self
    }

    pub fn with_end_of_frame_timeout(mut self, timeout: Duration) -> Self {
        self.end_of_frame_timeout = timeout;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DrawConfig::default();
        assert_eq!(config.gc_epoch_slack, 2);
        assert_eq!(config.pool_trim_epochs, 60);
        assert!(config.worker_threads >= 1);
        assert!(config.max_circle_steps >= 3);
    }

    #[test]
    fn circle_steps_floor() {
        let config = DrawConfig::default().with_max_circle_steps(1);
        assert_eq!(config.max_circle_steps, 3);
    }
}
