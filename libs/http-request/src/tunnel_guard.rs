//! Scoped suppression of a known proxy-tunnel assertion.
//!
//! The CONNECT tunnel connector in `hyper-util` can trip an internal
//! `assert_eq!` when a proxy closes the tunnel in an unexpected state. That
//! panic is raised on a connection task, not on the caller's future, so it
//! would otherwise end up in the process panic hook as a crash report.
//!
//! While at least one [`TunnelGuard`] is alive a process-wide panic hook is
//! installed that logs those assertions once at error level and forwards
//! every other panic to the hook that was installed before. The previous
//! hook is restored when the last guard is dropped.
//!
//! Applications should not call [`std::panic::set_hook`] while a proxied
//! request is in flight: releasing the last guard discards such a hook.

use parking_lot::Mutex;
use std::panic::PanicHookInfo;
use std::sync::Arc;

type PanicHook = dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static;

struct HookState {
    active: usize,
    /// Hook that was installed before ours; `Some` while ours is installed
    previous: Option<Arc<Box<PanicHook>>>,
}

static STATE: Mutex<HookState> = parking_lot::const_mutex(HookState {
    active: 0,
    previous: None,
});

/// RAII registration of the tunnel panic filter.
///
/// Held by the request pipeline for the lifetime of a proxied request,
/// including the body stream, and released on every exit path.
#[derive(Debug)]
#[must_use = "the panic filter is released when the guard is dropped"]
pub struct TunnelGuard {
    _private: (),
}

impl TunnelGuard {
    /// Register one more user of the panic filter, installing it if this
    /// is the first.
    pub fn acquire() -> Self {
        let mut state = STATE.lock();
        if state.active == 0 && state.previous.is_none() && !std::thread::panicking() {
            let previous: Arc<Box<PanicHook>> = Arc::new(std::panic::take_hook());
            let forward = Arc::clone(&previous);
            std::panic::set_hook(Box::new(move |info| {
                if !suppress(info) {
                    (**forward)(info);
                }
            }));
            state.previous = Some(previous);
            tracing::debug!("installed proxy tunnel panic filter");
        }
        state.active += 1;
        Self { _private: () }
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        let mut state = STATE.lock();
        state.active = state.active.saturating_sub(1);
        // Hooks cannot be swapped while unwinding; the next release restores.
        if state.active > 0 || std::thread::panicking() {
            return;
        }
        let Some(previous) = state.previous.take() else {
            return;
        };

        // Replaces whatever hook is current, including one the application
        // installed while a guard was alive: that hook is dropped and the
        // hook captured at install time comes back.
        drop(std::panic::take_hook());
        match Arc::try_unwrap(previous) {
            Ok(hook) => std::panic::set_hook(hook),
            Err(shared) => std::panic::set_hook(Box::new(move |info| (**shared)(info))),
        }
        tracing::debug!("restored previous panic hook");
    }
}

#[cfg(test)]
fn active_guards() -> usize {
    STATE.lock().active
}

fn suppress(info: &PanicHookInfo<'_>) -> bool {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or_default();
    let Some(location) = info.location() else {
        return false;
    };

    if !is_tunnel_assertion(message, location.file()) {
        return false;
    }
    tracing::error!(
        file = location.file(),
        line = location.line(),
        message,
        "suppressed proxy tunnel assertion"
    );
    true
}

/// Whether a panic is the `hyper-util` tunnel assertion.
///
/// All of these must hold: the message is an equality assertion failure
/// (`assertion ... left == right`), the expected value is `0`, and the
/// panic location lies in the `hyper-util` proxy tunnel source.
#[must_use]
pub fn is_tunnel_assertion(message: &str, file: &str) -> bool {
    message.starts_with("assertion")
        && message.contains("left == right")
        && message.contains("right: 0")
        && file.contains("hyper-util")
        && (file.contains("proxy/tunnel") || file.contains("proxy\\tunnel"))
}
