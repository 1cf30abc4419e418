//! Shared dispatch for request handlers

use crate::context::StatusChannel;
use crate::types::{ChangeRequest, Outcome};

/// A component that can take some requests of type `M`.
///
/// Handlers for other subsystems implement this with the same request and
/// outcome shapes, so one dispatcher can route between them.
pub trait Handler<M>: Send + Sync {
    /// Whether this handler processes `message`
    fn accepts(&self, message: &M) -> bool;

    /// Process `message`. Failures are reported in the outcome.
    fn process(&self, message: &M, status: &mut dyn StatusChannel) -> Outcome;
}

/// Routes each request to the first handler that accepts it
pub struct Dispatcher<M> {
    handlers: Vec<Box<dyn Handler<M>>>,
}

impl<M> Default for Dispatcher<M> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<M> Dispatcher<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Box<dyn Handler<M>>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// `None` when no handler accepts the message
    pub fn dispatch(&self, message: &M, status: &mut dyn StatusChannel) -> Option<Outcome> {
        self.handlers
            .iter()
            .find(|h| h.accepts(message))
            .map(|h| h.process(message, status))
    }
}

impl Dispatcher<ChangeRequest> {
    /// Dispatch, turning "nobody accepts this" into a rejected outcome
    pub fn dispatch_or_reject(
        &self,
        request: &ChangeRequest,
        status: &mut dyn StatusChannel,
    ) -> Outcome {
        self.dispatch(request, status).unwrap_or_else(|| {
            let err = crate::Error::invalid(format!("no handler accepts {request}"));
            Outcome::failure(Some(&request.fingerprint()), &err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoStatus;
    use crate::types::{FinalState, Operation};

    struct OnlyRemove;

    impl Handler<ChangeRequest> for OnlyRemove {
        fn accepts(&self, message: &ChangeRequest) -> bool {
            message.operation == Operation::Remove
        }

        fn process(&self, message: &ChangeRequest, _status: &mut dyn StatusChannel) -> Outcome {
            Outcome::success(
                FinalState::Applied,
                &message.fingerprint(),
                format!("removed {}", message.unit),
            )
        }
    }

    #[test]
    fn test_dispatch_to_accepting_handler() {
        let dispatcher = Dispatcher::new().register(Box::new(OnlyRemove));
        assert_eq!(dispatcher.len(), 1);

        let outcome = dispatcher
            .dispatch(&ChangeRequest::remove("app1"), &mut NoStatus)
            .unwrap();
        assert_eq!(outcome.result_text, "removed app1");

        assert!(
            dispatcher
                .dispatch(&ChangeRequest::synchronize(""), &mut NoStatus)
                .is_none()
        );
        let rejected = dispatcher.dispatch_or_reject(&ChangeRequest::synchronize(""), &mut NoStatus);
        assert_eq!(rejected.state, FinalState::Rejected);
    }
}
