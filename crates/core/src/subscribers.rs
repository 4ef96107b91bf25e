use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks how many clients are currently attached to the supervisor's
/// outbound stream, so C7 can skip LLM calls when nobody is listening
/// (spec.md §4.7 "only if ... at least one subscriber exists"). The network
/// surface calls `register()` on connect and drops the returned guard on
/// disconnect; this crate does not know or care what a "connection" is.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    count: Arc<AtomicUsize>,
}

/// RAII handle for one registered subscriber. Decrements the shared count
/// on drop so a disconnect during fan-out is automatically accounted for.
pub struct SubscriberGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> SubscriberGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        SubscriberGuard {
            count: self.count.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn has_subscribers(&self) -> bool {
        self.count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_and_dropping_tracks_count() {
        let registry = SubscriberRegistry::new();
        assert!(!registry.has_subscribers());

        let a = registry.register();
        let b = registry.register();
        assert_eq!(registry.count(), 2);

        drop(a);
        assert_eq!(registry.count(), 1);
        assert!(registry.has_subscribers());

        drop(b);
        assert!(!registry.has_subscribers());
    }
}
