//! Header-time veto over a response.

use crate::error::BoxError;
use crate::response::ResponseHead;
use std::fmt;
use std::sync::Arc;

type AbortFn = dyn Fn(&ResponseHead) -> Result<bool, BoxError> + Send + Sync;

/// Caller predicate deciding, from the response head alone, whether the
/// response should be dropped before any body byte is read.
///
/// Returning `Ok(true)` aborts the request. An `Err` is handed back to the
/// caller unchanged as [`RequestError::AbortPredicate`](crate::RequestError::AbortPredicate).
#[derive(Clone)]
pub struct AbortPredicate(Arc<AbortFn>);

impl AbortPredicate {
    /// Fallible predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ResponseHead) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Infallible predicate.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ResponseHead) -> bool + Send + Sync + 'static,
    {
        Self::new(move |head| Ok(f(head)))
    }

    fn call(&self, head: &ResponseHead) -> Result<bool, BoxError> {
        (self.0)(head)
    }
}

impl fmt::Debug for AbortPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AbortPredicate(..)")
    }
}

/// Outcome of the abort gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortDecision {
    Continue,
    Abort,
}

/// Run the abort gate for `head`.
///
/// Without a predicate the response always continues.
///
/// # Errors
/// Returns whatever the predicate returned as its error.
pub fn evaluate(
    predicate: Option<&AbortPredicate>,
    head: &ResponseHead,
) -> Result<AbortDecision, BoxError> {
    let Some(predicate) = predicate else {
        return Ok(AbortDecision::Continue);
    };
    if predicate.call(head)? {
        Ok(AbortDecision::Abort)
    } else {
        Ok(AbortDecision::Continue)
    }
}
