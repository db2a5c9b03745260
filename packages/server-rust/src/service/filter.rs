//! Request filters and the ordered chain that runs them.
//!
//! A filter is an async predicate over the request [`Context`]: `Ok(true)`
//! lets the request continue, `Ok(false)` denies it, and `Err` is a fault.
//! A procedure's chain is its service's filters followed by its own,
//! concatenated once at registration.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::Context;

// ---------------------------------------------------------------------------
// Filter trait
// ---------------------------------------------------------------------------

/// Asynchronous gatekeeper evaluated before a procedure is invoked.
///
/// Filters are stateless by contract. Communication with later filters or
/// the handler goes through `Context::extensions`.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Name used in logs and denial messages.
    fn name(&self) -> &str;

    /// Returns `Ok(true)` to continue, `Ok(false)` to deny.
    async fn check(&self, ctx: &Context) -> anyhow::Result<bool>;
}

/// Shared handle to a filter.
pub type SharedFilter = Arc<dyn Filter>;

// ---------------------------------------------------------------------------
// FnFilter
// ---------------------------------------------------------------------------

/// Filter backed by an async closure. See [`filter_fn`].
pub struct FnFilter<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Filter for FnFilter<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, ctx: &Context) -> anyhow::Result<bool> {
        (self.f)(ctx.clone()).await
    }
}

/// Builds a shared filter from an async closure.
///
/// ```ignore
/// let require_auth = filter_fn("RequireAuthHeader", |ctx| async move {
///     Ok(ctx.header("authorization").is_some())
/// });
/// ```
pub fn filter_fn<F, Fut>(name: impl Into<String>, f: F) -> SharedFilter
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(FnFilter {
        name: name.into(),
        f,
    })
}

// ---------------------------------------------------------------------------
// FilterChain
// ---------------------------------------------------------------------------

/// Result of running a chain.
#[derive(Debug)]
pub enum ChainVerdict {
    /// Every filter allowed the request (or the chain is empty).
    Continue,
    /// A filter denied the request. Later filters were not evaluated.
    Denied { filter: String },
    /// A filter failed. Later filters were not evaluated.
    Fault {
        filter: String,
        error: anyhow::Error,
    },
}

/// Immutable, ordered list of filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Arc<[SharedFilter]>,
}

impl FilterChain {
    #[must_use]
    pub fn new(filters: Vec<SharedFilter>) -> Self {
        Self {
            filters: filters.into(),
        }
    }

    /// Service-level filters followed by procedure-level filters.
    #[must_use]
    pub fn concat(service: &[SharedFilter], procedure: &[SharedFilter]) -> Self {
        let filters: Vec<_> = service.iter().chain(procedure).cloned().collect();
        Self::new(filters)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter names in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|f| f.name())
    }

    /// Evaluates the filters one at a time, stopping at the first denial or
    /// fault.
    pub async fn run(&self, ctx: &Context) -> ChainVerdict {
        for filter in self.filters.iter() {
            match filter.check(ctx).await {
                Ok(true) => {}
                Ok(false) => {
                    return ChainVerdict::Denied {
                        filter: filter.name().to_string(),
                    }
                }
                Err(error) => {
                    return ChainVerdict::Fault {
                        filter: filter.name().to_string(),
                        error,
                    }
                }
            }
        }
        ChainVerdict::Continue
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use bytes::Bytes;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use switchyard_core::RawRequest;

    use super::*;

    fn ctx() -> Context {
        Context::new(Arc::new(RawRequest::new("/Echo.Repeat", Bytes::new())))
    }

    /// Filter that appends its name to a shared log and answers `allow`.
    fn recording(
        name: &'static str,
        allow: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    ) -> SharedFilter {
        filter_fn(name, move |_ctx| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(name);
                Ok(allow)
            }
        })
    }

    fn counting(name: &'static str, allow: bool, counter: Arc<AtomicU32>) -> SharedFilter {
        filter_fn(name, move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(allow)
            }
        })
    }

    #[tokio::test]
    async fn empty_chain_continues() {
        let chain = FilterChain::default();
        assert!(chain.is_empty());
        assert!(matches!(chain.run(&ctx()).await, ChainVerdict::Continue));
    }

    #[tokio::test]
    async fn service_filters_run_before_procedure_filters() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::concat(
            &[recording("A", true, log.clone()), recording("B", true, log.clone())],
            &[recording("C", true, log.clone())],
        );

        assert!(matches!(chain.run(&ctx()).await, ChainVerdict::Continue));
        assert_eq!(*log.lock(), vec!["A", "B", "C"]);
        assert_eq!(chain.names().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn denial_stops_the_chain() {
        let b_count = Arc::new(AtomicU32::new(0));
        let c_count = Arc::new(AtomicU32::new(0));
        let a = filter_fn("A", |_ctx| async { Ok(true) });
        let chain = FilterChain::concat(
            &[a, counting("B", false, b_count.clone())],
            &[counting("C", true, c_count.clone())],
        );

        let verdict = chain.run(&ctx()).await;
        assert!(matches!(verdict, ChainVerdict::Denied { ref filter } if filter == "B"));
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
        assert_eq!(c_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fault_is_not_a_denial() {
        let c_count = Arc::new(AtomicU32::new(0));
        let broken = filter_fn("Broken", |_ctx| async {
            Err(anyhow::anyhow!("session store down"))
        });
        let chain = FilterChain::new(vec![broken, counting("C", true, c_count.clone())]);

        match chain.run(&ctx()).await {
            ChainVerdict::Fault { filter, error } => {
                assert_eq!(filter, "Broken");
                assert_eq!(error.to_string(), "session store down");
            }
            other => panic!("expected fault, got {other:?}"),
        }
        assert_eq!(c_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn later_filters_see_earlier_extensions() {
        #[derive(Clone)]
        struct UserId(u64);

        let set = filter_fn("SetUser", |ctx| async move {
            ctx.extensions().insert(UserId(7));
            Ok(true)
        });
        let check = filter_fn("RequireUser", |ctx| async move {
            Ok(ctx.extensions().get::<UserId>().is_some_and(|u| u.0 == 7))
        });

        let chain = FilterChain::new(vec![set, check]);
        assert!(matches!(chain.run(&ctx()).await, ChainVerdict::Continue));

        // Reversed order: the check runs before anything is set.
        let set = filter_fn("SetUser", |ctx| async move {
            ctx.extensions().insert(UserId(7));
            Ok(true)
        });
        let check = filter_fn("RequireUser", |ctx| async move {
            Ok(ctx.extensions().get::<UserId>().is_some())
        });
        let chain = FilterChain::new(vec![check, set]);
        assert!(matches!(chain.run(&ctx()).await, ChainVerdict::Denied { .. }));
    }

    proptest! {
        /// For any allow/deny pattern, filters run in order up to and
        /// including the first denial, and never past it.
        #[test]
        fn runs_prefix_up_to_first_denial(
            pattern in proptest::collection::vec(any::<bool>(), 0..12)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let log = Arc::new(Mutex::new(Vec::new()));
            let names: Vec<&'static str> = [
                "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11",
            ]
            .into_iter()
            .take(pattern.len())
            .collect();
            let filters: Vec<_> = names
                .iter()
                .zip(&pattern)
                .map(|(name, allow)| recording(*name, *allow, log.clone()))
                .collect();
            let split = filters.len() / 2;
            let chain = FilterChain::concat(&filters[..split], &filters[split..]);

            let verdict = rt.block_on(chain.run(&ctx()));

            let first_deny = pattern.iter().position(|allow| !allow);
            let expected_len = first_deny.map_or(pattern.len(), |i| i + 1);
            prop_assert_eq!(log.lock().clone(), names[..expected_len].to_vec());
            match first_deny {
                Some(i) => prop_assert!(
                    matches!(verdict, ChainVerdict::Denied { ref filter } if filter == names[i]),
                    "expected Denied by {}",
                    names[i]
                ),
                None => prop_assert!(matches!(verdict, ChainVerdict::Continue)),
            }
        }
    }
}
