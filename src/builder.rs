//! Fluent builder for [`ContextThread`] construction.

use crate::runtime::{Context, ContextThread};

use std::io;
use std::thread;

/// Builder for configuring the thread behind a [`ContextThread`].
///
/// # Example
/// ```ignore
/// let thread = ContextThreadBuilder::new()
///     .name("ui-loop")
///     .stack_size(256 * 1024)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContextThreadBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ContextThreadBuilder {
    /// Creates a builder with default settings.
    ///
    /// The thread is named `runloop-<id>` after its context unless a name is
    /// given.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the thread.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the thread's stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Creates the context and starts its thread.
    ///
    /// # Errors
    /// Returns the OS error if the thread could not be spawned.
    pub fn build(self) -> io::Result<ContextThread> {
        let context = Context::new();
        let name = self
            .name
            .unwrap_or_else(|| format!("runloop-{}", context.id()));

        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        ContextThread::spawn(builder, context)
    }
}
