use tracing::{Span, span::Entered};

/// Diagnostic context handed to every pass instead of a process-wide logger.
///
/// Each pass nests its own span under the caller's, so events emitted while
/// scheduling one graph stay attributed to that run.
#[derive(Debug, Clone)]
pub struct LogContext {
    span: Span,
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new("vpusched")
    }
}

impl LogContext {
    pub fn new(run: &str) -> Self {
        Self {
            span: tracing::info_span!("schedule", run),
        }
    }

    /// A context that records nothing.
    pub fn disabled() -> Self {
        Self { span: Span::none() }
    }

    pub fn nest(&self, stage: &'static str) -> Self {
        Self {
            span: tracing::debug_span!(parent: &self.span, "stage", stage),
        }
    }

    pub fn enter(&self) -> Entered<'_> {
        self.span.enter()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}
