//! Redirect policy for the per-request stack
//!
//! Follows redirects according to the request's [`RedirectPolicy`], stops
//! once the hop limit is reached (handing back the last 3xx response), and
//! strips credentials once the chain leaves the original origin.

use crate::config::{RedirectAttempt, RedirectPolicy};
use http::{Request, Uri, header};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

/// Headers that are stripped on cross-origin redirects to prevent credential leakage
const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// [`Policy`] implementation driven by a [`RedirectPolicy`].
#[derive(Debug, Clone)]
pub struct FollowPolicy {
    policy: RedirectPolicy,
    max_redirects: usize,
    /// Track the number of redirects followed (resets per-request via Clone)
    redirect_count: usize,
    /// Track if we're in a cross-origin redirect chain (for header stripping)
    cross_origin_detected: bool,
}

impl FollowPolicy {
    #[must_use]
    pub fn new(policy: RedirectPolicy, max_redirects: usize) -> Self {
        Self {
            policy,
            max_redirects,
            redirect_count: 0,
            cross_origin_detected: false,
        }
    }

    /// Same scheme, host and port; missing ports use the scheme default.
    fn is_same_origin(original: &Uri, target: &Uri) -> bool {
        let orig_scheme = original.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        let orig_port = original
            .port_u16()
            .unwrap_or_else(|| default_port(orig_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        orig_scheme == target_scheme
            && original.host().unwrap_or("") == target.host().unwrap_or("")
            && orig_port == target_port
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B: Clone, E> Policy<B, E> for FollowPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        let allowed = match &self.policy {
            RedirectPolicy::Follow => true,
            RedirectPolicy::Never => false,
            RedirectPolicy::Predicate(predicate) => predicate.allows(&RedirectAttempt {
                status: attempt.status(),
                location: attempt.location().clone(),
                previous: attempt.previous().clone(),
            }),
        };
        if !allowed {
            tracing::debug!(target = %attempt.location(), "redirect not followed");
            return Ok(Action::Stop);
        }

        self.redirect_count += 1;
        if self.redirect_count > self.max_redirects {
            tracing::debug!(
                count = self.redirect_count,
                max = self.max_redirects,
                "Redirect limit reached"
            );
            return Ok(Action::Stop);
        }

        let original = attempt.previous();
        let target = attempt.location();
        if !Self::is_same_origin(original, target) {
            self.cross_origin_detected = true;
            tracing::debug!(
                original = %original,
                target = %target,
                "Cross-origin redirect detected"
            );
        }

        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        if self.cross_origin_detected {
            let headers = request.headers_mut();
            for header_name in SENSITIVE_HEADERS {
                if headers.remove(header_name).is_some() {
                    tracing::debug!(header = %header_name, "Stripped sensitive header on cross-origin redirect");
                }
            }
        }
    }

    fn clone_body(&self, body: &B) -> Option<B> {
        // 307/308 resend the original body
        Some(body.clone())
    }
}
