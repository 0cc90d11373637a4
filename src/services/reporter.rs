//! Sinks for completed trials

use std::time::Duration;

use tracing::info;

use crate::models::TrialContext;

/// Receives one call per successful trial. Dropped trials are never reported.
pub trait Reporter: Send + Sync + 'static {
    fn report(&self, elapsed: Duration, context: TrialContext);
}

impl<F> Reporter for F
where
    F: Fn(Duration, TrialContext) + Send + Sync + 'static,
{
    fn report(&self, elapsed: Duration, context: TrialContext) {
        self(elapsed, context)
    }
}

/// Writes each sample to the log as structured JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, elapsed: Duration, context: TrialContext) {
        let context = serde_json::to_string(&context).unwrap_or_default();
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            context = %context,
            "proxybench sample"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FIELD_SUCCESS;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_closure_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter: Box<dyn Reporter> = Box::new(move |elapsed: Duration, ctx: TrialContext| {
            sink.lock().push((elapsed, ctx));
        });

        let mut ctx = TrialContext::new();
        ctx.set(FIELD_SUCCESS, true);
        reporter.report(Duration::from_millis(12), ctx.clone());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, Duration::from_millis(12));
        assert_eq!(seen[0].1, ctx);
    }

    #[test]
    fn test_log_reporter_does_not_panic() {
        let mut ctx = TrialContext::new();
        ctx.set(FIELD_SUCCESS, true);
        LogReporter.report(Duration::from_secs(1), ctx);
    }
}
