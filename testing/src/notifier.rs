//! Notifier doubles.

use keygate_core::{EngineEvent, Notifier, NotifyError};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

/// Captures every event for later assertions
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, oldest first
    #[must_use]
    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events whose [`EngineEvent::kind`] matches
    #[must_use]
    pub fn of_kind(&self, kind: &str) -> Vec<EngineEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind() == kind)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        event: EngineEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Box::pin(async { Ok(()) })
    }
}

/// Rejects every event
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(
        &self,
        event: EngineEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        let kind = event.kind();
        Box::pin(async move { Err(NotifyError(format!("mail relay refused {kind}"))) })
    }
}
