//! In-process services.

use super::{Completion, ServiceRequest, ServiceResult, TransformService};

/// Returns the input text unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityService;

impl TransformService for IdentityService {
    fn invoke(&self, request: ServiceRequest, completion: Completion) {
        completion.complete(Ok(request.text));
    }

    fn is_reentrant(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Adapts a closure into a synchronous service.
pub struct FnService<F> {
    name: String,
    reentrant: bool,
    function: F,
}

impl<F> FnService<F>
where
    F: Fn(ServiceRequest) -> ServiceResult + Send + Sync,
{
    /// Wraps `function` as a non-reentrant service.
    pub fn new(name: impl Into<String>, function: F) -> Self {
        Self {
            name: name.into(),
            reentrant: false,
            function,
        }
    }

    /// Marks the service as safe to invoke concurrently.
    #[must_use]
    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }
}

impl<F> TransformService for FnService<F>
where
    F: Fn(ServiceRequest) -> ServiceResult + Send + Sync,
{
    fn invoke(&self, request: ServiceRequest, completion: Completion) {
        completion.complete((self.function)(request));
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    fn name(&self) -> &str {
        &self.name
    }
}
