//! Compensation stack for partially provisioned cloud state.
//!
//! Every provisioning step that allocates cloud resources pushes an undo
//! action. On any error the driver unwinds the stack in LIFO order; each
//! action's failure is logged and swallowed so that as much as possible is
//! reclaimed.

use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error};

type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), crate::error::Error>> + Send>>;
type CleanupFn = Box<dyn FnOnce() -> CleanupFuture + Send>;

struct CleanupAction {
    name: String,
    run: CleanupFn,
}

/// LIFO stack of compensating actions owned by the driver frame.
#[derive(Default)]
pub struct CleanupStack {
    actions: Vec<CleanupAction>,
}

impl CleanupStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a compensating action to run if the search has to be unwound.
    pub fn push<F, Fut>(&mut self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), crate::error::Error>> + Send + 'static,
    {
        self.actions.push(CleanupAction {
            name: name.into(),
            run: Box::new(move || Box::pin(action())),
        });
    }

    /// Drop all recorded actions; called once the search is fully
    /// submitted and the allocated state becomes the intended outcome.
    pub fn disarm(&mut self) {
        self.actions.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Unwind in LIFO order. Failures are logged, never propagated.
    pub async fn unwind(&mut self) {
        while let Some(action) = self.actions.pop() {
            debug!("cleanup: {}", action.name);
            if let Err(e) = (action.run)().await {
                error!("cleanup step '{}' failed: {e}", action.name);
            }
        }
    }
}
