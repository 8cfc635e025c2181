//! Timing helpers for wrapper generation and kernel invocations.
//!
//! ```rust
//! use torchbridge_tracing::performance::{PerformanceSpan, record_generation};
//!
//! let span = PerformanceSpan::new("generate", Some(100));
//! // ... emit wrappers ...
//! drop(span); // logged only if it took at least 100μs
//!
//! record_generation("cuda", 3, 4096, 120);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;

static ENABLED: AtomicBool = AtomicBool::new(true);
/// `u64::MAX` means "no global threshold".
static GLOBAL_THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Apply the subscriber's performance settings to every span created afterwards.
pub fn set_enabled(enabled: bool, threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    GLOBAL_THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// RAII guard that measures its own lifetime and logs it on drop.
///
/// The event is skipped when performance tracing is disabled or the duration
/// is below the span's threshold (or the global one, whichever is larger).
pub struct PerformanceSpan {
    name: String,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    pub fn new(name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, name, threshold_us)
    }

    pub fn with_level(level: Level, name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let name = name.into();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            name,
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    fn effective_threshold(&self) -> Option<u64> {
        let global = GLOBAL_THRESHOLD_US.load(Ordering::Relaxed);
        let global = (global != u64::MAX).then_some(global);
        match (self.threshold_us, global) {
            (Some(local), Some(global)) => Some(local.max(global)),
            (local, global) => local.or(global),
        }
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }
        let elapsed_us = self.elapsed_us();
        if self.effective_threshold().is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record one generator run.
pub fn record_generation(backend: &str, wrappers: usize, source_bytes: usize, duration_us: u64) {
    tracing::debug!(
        event = "generation",
        backend = backend,
        wrappers = wrappers,
        source_bytes = source_bytes,
        duration_us = duration_us,
        "wrapper_generation"
    );
}

/// Record one kernel call made through a Rust-side wrapper invocation.
pub fn record_invocation(kernel: &str, backend: &str, buffers: usize, duration_us: u64) {
    tracing::debug!(
        event = "invocation",
        kernel = kernel,
        backend = backend,
        buffers = buffers,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        "kernel_invocation"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn span_keeps_name_and_threshold() {
        let span = PerformanceSpan::new("generate", Some(1000));
        assert_eq!(span.name(), "generate");
        assert_eq!(span.threshold_us, Some(1000));
    }

    #[test]
    fn span_measures_elapsed_time() {
        let span = PerformanceSpan::new("sleep", None);
        thread::sleep(Duration::from_millis(5));
        assert!(span.elapsed_us() >= 5_000);
    }

    #[test]
    #[serial]
    fn global_threshold_raises_local_one() {
        set_enabled(true, Some(500));
        let span = PerformanceSpan::new("threshold", Some(100));
        assert_eq!(span.effective_threshold(), Some(500));
        let span = PerformanceSpan::new("threshold", None);
        assert_eq!(span.effective_threshold(), Some(500));
        set_enabled(true, None);
        assert_eq!(span.effective_threshold(), None);
    }

    #[test]
    #[serial]
    fn disabled_spans_drop_quietly() {
        set_enabled(false, None);
        assert!(!is_enabled());
        drop(PerformanceSpan::with_level(Level::INFO, "quiet", None));
        set_enabled(true, None);
    }

    #[test]
    fn record_helpers_do_not_panic() {
        record_generation("cpu", 2, 1024, 10);
        record_invocation("vadd", "cuda", 3, 42);
    }
}
