//! Token counting capability.

/// Counts backend cost units for a piece of text.
///
/// Implementations must be deterministic and pure: the assembler relies on
/// identical inputs producing identical costs.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}
