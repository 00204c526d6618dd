//! Event hook trait and the combinators that wrap it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tracelink_core::{EventType, ExternalEvent};

/// Receives every lifecycle event the workflow engine emits.
///
/// Implementations must not fail the workflow: errors are logged inside.
#[async_trait]
pub trait TraceHook: Send + Sync {
    async fn on_event(&self, event: &ExternalEvent);
}

#[async_trait]
impl<T: TraceHook + ?Sized> TraceHook for Arc<T> {
    async fn on_event(&self, event: &ExternalEvent) {
        (**self).on_event(event).await
    }
}

/// Which events a [`FilteredHook`] passes through.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// When non-empty, only these types pass.
    pub include: Vec<EventType>,
    pub exclude: Vec<EventType>,
    /// End events shorter than this are dropped.
    pub min_duration: Option<Duration>,
}

impl EventFilter {
    pub fn allows(&self, event: &ExternalEvent) -> bool {
        if !self.include.is_empty() && !self.include.contains(&event.event_type) {
            return false;
        }
        if self.exclude.contains(&event.event_type) {
            return false;
        }
        if let Some(min) = self.min_duration {
            let min_ms = i64::try_from(min.as_millis()).unwrap_or(i64::MAX);
            if event.event_type.is_end() && event.duration_millis() < min_ms {
                return false;
            }
        }
        true
    }
}

pub struct FilteredHook<H> {
    inner: H,
    filter: EventFilter,
}

impl<H: TraceHook> FilteredHook<H> {
    pub fn new(inner: H, filter: EventFilter) -> Self {
        Self { inner, filter }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: TraceHook> TraceHook for FilteredHook<H> {
    async fn on_event(&self, event: &ExternalEvent) {
        if self.filter.allows(event) {
            self.inner.on_event(event).await;
        }
    }
}

/// Fans each event out to every registered hook, in registration order.
#[derive(Default)]
pub struct MultiHook {
    hooks: Vec<Arc<dyn TraceHook>>,
}

impl MultiHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook(&mut self, hook: Arc<dyn TraceHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl TraceHook for MultiHook {
    async fn on_event(&self, event: &ExternalEvent) {
        for hook in &self.hooks {
            hook.on_event(event).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHook {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl TraceHook for CountingHook {
        async fn on_event(&self, _event: &ExternalEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_include_and_exclude() {
        let counter = Arc::new(CountingHook::default());
        let hook = FilteredHook::new(
            counter.clone(),
            EventFilter {
                include: vec![EventType::NodeStart, EventType::NodeEnd],
                exclude: vec![EventType::NodeEnd],
                min_duration: None,
            },
        );

        hook.on_event(&ExternalEvent::new("a", EventType::NodeStart)).await;
        hook.on_event(&ExternalEvent::new("a", EventType::NodeEnd)).await;
        hook.on_event(&ExternalEvent::new("g", EventType::GraphStart)).await;

        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_min_duration_only_applies_to_end_events() {
        let counter = Arc::new(CountingHook::default());
        let hook = FilteredHook::new(
            counter.clone(),
            EventFilter {
                min_duration: Some(Duration::from_millis(50)),
                ..EventFilter::default()
            },
        );

        hook.on_event(&ExternalEvent::new("a", EventType::NodeStart)).await;
        hook.on_event(&ExternalEvent::new("a", EventType::NodeEnd).with_duration_ms(10))
            .await;
        hook.on_event(&ExternalEvent::new("b", EventType::NodeEnd).with_duration_ms(80))
            .await;

        assert_eq!(counter.seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_huge_min_duration_drops_every_end_event() {
        let filter = EventFilter {
            min_duration: Some(Duration::MAX),
            ..EventFilter::default()
        };

        assert!(!filter.allows(
            &ExternalEvent::new("a", EventType::NodeEnd).with_duration_ms(i64::MAX - 1)
        ));
        assert!(filter.allows(&ExternalEvent::new("a", EventType::NodeStart)));
    }

    #[tokio::test]
    async fn test_multi_hook_fans_out() {
        let first = Arc::new(CountingHook::default());
        let second = Arc::new(CountingHook::default());
        let mut multi = MultiHook::new();
        multi.add_hook(first.clone());
        multi.add_hook(second.clone());

        multi.on_event(&ExternalEvent::new("g", EventType::GraphStart)).await;

        assert_eq!(multi.len(), 2);
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
    }
}
