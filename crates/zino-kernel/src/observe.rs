//! Spans for provider calls that close themselves when left idle.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Span;

#[derive(Debug)]
struct SpanState {
    span: Mutex<Option<Span>>,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
    started_at: DateTime<Utc>,
}

impl SpanState {
    fn close(&self, reason: &str) {
        if let Some(span) = self.span.lock().take() {
            self.closed.store(true, Ordering::Release);
            let elapsed = Utc::now().signed_duration_since(self.started_at);
            tracing::debug!(
                parent: &span,
                "span closed ({}) after {} ms",
                reason,
                elapsed.num_milliseconds()
            );
        }
    }
}

/// A span that is dropped after a window without activity.
///
/// A caller that never consumes a response cannot leak the span: a watchdog task
/// closes it once [`touch`](IdleSpan::touch) has not been called for the idle window.
/// Outside a tokio runtime there is no watchdog and the span only closes when it is
/// finished or dropped.
#[derive(Debug)]
pub struct IdleSpan {
    state: Arc<SpanState>,
    watchdog: Option<JoinHandle<()>>,
}

impl IdleSpan {
    /// Wraps a span and starts the watchdog.
    pub fn new(span: Span, idle_timeout: Duration) -> Self {
        let state = Arc::new(SpanState {
            span: Mutex::new(Some(span)),
            last_activity: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            started_at: Utc::now(),
        });
        let watchdog = match Handle::try_current() {
            Ok(handle) => {
                let watched = state.clone();
                Some(handle.spawn(async move {
                    loop {
                        let deadline = *watched.last_activity.lock() + idle_timeout;
                        tokio::time::sleep_until(deadline).await;
                        if watched.last_activity.lock().elapsed() >= idle_timeout {
                            watched.close("inactivity");
                            break;
                        }
                    }
                }))
            }
            Err(_) => {
                tracing::debug!("no tokio runtime, the span has no idle watchdog");
                None
            }
        };
        Self { state, watchdog }
    }

    /// Records activity, postponing the idle deadline.
    pub fn touch(&self) {
        *self.state.last_activity.lock() = Instant::now();
    }

    /// Returns the span, or a disabled span once closed.
    pub fn span(&self) -> Span {
        self.state.span.lock().clone().unwrap_or_else(Span::none)
    }

    /// Returns `true` once the span has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Returns when the span was opened.
    #[inline]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.state.started_at
    }

    /// Closes the span now.
    pub fn finish(self) {
        self.state.close("finished");
    }
}

impl Drop for IdleSpan {
    fn drop(&mut self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.abort();
        }
        self.state.close("dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closes_after_inactivity() {
        let span = IdleSpan::new(tracing::info_span!("chat"), Duration::from_millis(20));
        assert!(!span.is_closed());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(span.is_closed());
        assert!(span.span().is_none());
    }

    #[tokio::test]
    async fn test_touch_keeps_span_open() {
        let span = IdleSpan::new(tracing::info_span!("chat"), Duration::from_millis(100));
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            span.touch();
        }
        assert!(!span.is_closed());
        span.finish();
    }

    #[test]
    fn test_without_runtime() {
        let span = IdleSpan::new(tracing::info_span!("chat"), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert!(!span.is_closed());
        span.touch();
        span.finish();
    }
}
