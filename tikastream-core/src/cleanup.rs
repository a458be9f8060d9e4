//! Cleanup hooks: release actions for whatever backs an acquired source.
//!
//! Hooks carry an explicit identifier. A [`CleanupChain`] runs its hooks in
//! the order they were added and refuses a second hook with an identifier it
//! already holds.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;

use crate::error::CleanupError;

type BoxError = Box<dyn StdError + Send + Sync>;
type HookFn = dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;

/// A named, re-invocable release action.
#[derive(Clone)]
pub struct CleanupHook {
    id: Arc<str>,
    action: Arc<HookFn>,
}

impl CleanupHook {
    pub fn new<F, Fut, E>(id: impl AsRef<str>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            id: Arc::from(id.as_ref()),
            action: Arc::new(move || {
                let fut = action();
                Box::pin(async move { fut.await.map_err(Into::into) })
            }),
        }
    }

    /// Remove a file; an already missing file counts as released.
    pub fn remove_file(path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        let id = format!("remove {}", path.display());
        Self::new(id, move || {
            let path = path.clone();
            async move {
                match tokio::fs::remove_file(&path).await {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                }
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn run(&self) -> Result<(), CleanupError> {
        (self.action)()
            .await
            .map_err(|e| CleanupError::new(self.id.as_ref(), e))
    }
}

impl fmt::Debug for CleanupHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CleanupHook").field(&self.id).finish()
    }
}

/// How the resource behind an inline source is released.
#[derive(Debug, Clone, Default)]
pub enum SourceRelease {
    /// Dropping the reader is enough
    #[default]
    NoCleanup,
    /// Run this hook once the source is no longer needed
    Owned(CleanupHook),
}

/// Ordered list of hooks behind a reader/writer lock.
///
/// Reads (snapshot for invocation) and writes (set/chain) may come from
/// different tasks; hooks are awaited outside the lock.
#[derive(Debug, Default)]
pub struct CleanupChain {
    hooks: RwLock<Vec<CleanupHook>>,
}

impl CleanupChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every hook with `hook`, returning what was there before.
    pub fn set(&self, hook: CleanupHook) -> Vec<CleanupHook> {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *hooks, vec![hook])
    }

    /// Append `hook`. Returns `false` (and changes nothing) if a hook with the
    /// same identifier is already chained.
    pub fn chain(&self, hook: CleanupHook) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(|e| e.into_inner());
        if hooks.iter().any(|h| h.id == hook.id) {
            return false;
        }
        hooks.push(hook);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.snapshot().iter().map(|h| h.id().to_string()).collect()
    }

    fn snapshot(&self) -> Vec<CleanupHook> {
        self.hooks.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run every hook in order. All hooks run even if some fail; each failure
    /// is logged and the last one is returned.
    ///
    /// The hooks are read when this is called, not when the future is polled.
    pub fn run(&self) -> impl Future<Output = Result<(), CleanupError>> + Send + 'static {
        let hooks = self.snapshot();
        async move {
            let mut last_failure = None;
            for hook in hooks {
                match hook.run().await {
                    Ok(()) => tracing::debug!(hook = hook.id(), "cleanup hook ran"),
                    Err(e) => {
                        tracing::warn!(hook = hook.id(), error = %e, "cleanup hook failed");
                        last_failure = Some(e);
                    }
                }
            }
            match last_failure {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counting_hook(id: &str, counter: Arc<AtomicUsize>) -> CleanupHook {
        CleanupHook::new(id, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), io::Error>(())
            }
        })
    }

    fn failing_hook(id: &str, log: Arc<Mutex<Vec<String>>>) -> CleanupHook {
        let name = id.to_string();
        CleanupHook::new(id, move || {
            let log = log.clone();
            let name = name.clone();
            async move {
                log.lock().unwrap().push(name.clone());
                Err::<(), _>(format!("{name} broke"))
            }
        })
    }

    #[tokio::test]
    async fn test_distinct_hooks_both_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let chain = CleanupChain::new();
        for id in ["first", "second"] {
            let order = order.clone();
            chain.chain(CleanupHook::new(id, move || {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(id);
                    Ok::<(), io::Error>(())
                }
            }));
        }

        chain.run().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_same_hook_chained_twice_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let hook = counting_hook("close-upload", counter.clone());
        let chain = CleanupChain::new();

        assert!(chain.chain(hook.clone()));
        assert!(!chain.chain(hook));
        chain.run().await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_later_hooks_and_last_failure_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let chain = CleanupChain::new();
        chain.chain(failing_hook("a", log.clone()));
        chain.chain(counting_hook("ok", counter.clone()));
        chain.chain(failing_hook("b", log.clone()));

        let err = chain.run().await.unwrap_err();

        assert_eq!(err.hook, "b");
        assert_eq!(*log.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_earlier_failure_is_not_masked_by_later_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let chain = CleanupChain::new();
        chain.chain(failing_hook("first", log));
        chain.chain(counting_hook("second", counter.clone()));

        let err = chain.run().await.unwrap_err();
        assert_eq!(err.hook, "first");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_replaces_and_returns_previous() {
        let counter = Arc::new(AtomicUsize::new(0));
        let chain = CleanupChain::new();
        chain.chain(counting_hook("old", counter.clone()));

        let previous = chain.set(counting_hook("new", counter.clone()));

        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].id(), "old");
        assert_eq!(chain.ids(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_file_tolerates_missing_file() {
        let path = std::env::temp_dir().join("tikastream_cleanup_remove_test.bin");
        std::fs::write(&path, b"spooled").unwrap();
        let hook = CleanupHook::remove_file(&path);

        hook.run().await.unwrap();
        assert!(!path.exists());
        hook.run().await.unwrap();
    }
}
