//! Logging setup.
//!
//! The subscriber is not installed globally. Each thread enters the
//! dispatcher for as long as it runs, and dropping the last guard and the
//! `Logging` value tears it down.

use tracing::dispatcher::{self, DefaultGuard, Dispatch};
use tracing_subscriber::EnvFilter;

/// Handle to the engine's log dispatcher.
#[derive(Clone)]
pub struct Logging {
    dispatch: Dispatch,
}

impl Logging {
    /// Build a formatted subscriber filtered by `RUST_LOG`, falling back to
    /// `default_filter`.
    pub fn init(default_filter: &str) -> Self {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .finish();
        Self {
            dispatch: Dispatch::new(subscriber),
        }
    }

    /// Route the calling thread's events to this dispatcher until the guard
    /// is dropped.
    #[must_use]
    pub fn enter(&self) -> DefaultGuard {
        dispatcher::set_default(&self.dispatch)
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::NoSubscriber;

    #[test]
    fn enter_scopes_dispatcher_to_thread() {
        let logging = Logging::init("info");
        {
            let _guard = logging.enter();
            dispatcher::get_default(|current| assert!(!current.is::<NoSubscriber>()));
        }
        dispatcher::get_default(|current| assert!(current.is::<NoSubscriber>()));
    }

    #[test]
    fn clones_share_dispatcher_across_threads() {
        let logging = Logging::init("debug");
        let remote = logging.clone();
        std::thread::spawn(move || {
            let _guard = remote.enter();
            dispatcher::get_default(|current| assert!(!current.is::<NoSubscriber>()));
        })
        .join()
        .unwrap();
    }
}
