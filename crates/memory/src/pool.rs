use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// A bounded pool of pre-built clients, acquired per call with a timeout
/// (spec.md §4.9 "Connection discipline"). Exhaustion does not block the
/// caller indefinitely: it falls back to an ephemeral client built from the
/// same factory and logs a warning, matching spec.md §4.9's explicit
/// fallback behavior.
pub struct ClientPool<T> {
    factory: Arc<dyn Fn() -> T + Send + Sync>,
    free: Sender<T>,
    idle: Receiver<T>,
    acquire_timeout: Duration,
}

/// A client borrowed from the pool. Returns itself to the pool on drop
/// unless the pool has since been closed.
pub struct PooledClient<T> {
    client: Option<T>,
    free: Sender<T>,
}

impl<T> std::ops::Deref for PooledClient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.client.as_ref().expect("client taken before drop")
    }
}

impl<T> Drop for PooledClient<T> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = self.free.try_send(client);
        }
    }
}

impl<T: Send + 'static> ClientPool<T> {
    pub fn new(size: usize, acquire_timeout: Duration, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let (free, idle) = crossbeam_channel::bounded(size);
        let factory = Arc::new(factory);
        for _ in 0..size {
            let _ = free.try_send((factory)());
        }
        Self {
            factory,
            free,
            idle,
            acquire_timeout,
        }
    }

    /// Acquires a client, waiting up to `acquire_timeout`. On timeout,
    /// builds and returns an ephemeral client (not tracked by the pool) and
    /// logs a warning, per spec.md §4.9.
    pub fn acquire(&self) -> PooledClient<T> {
        match self.idle.recv_timeout(self.acquire_timeout) {
            Ok(client) => PooledClient {
                client: Some(client),
                free: self.free.clone(),
            },
            Err(_) => {
                tracing::warn!("memory client pool exhausted, creating ephemeral client");
                PooledClient {
                    client: Some((self.factory)()),
                    free: self.free.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn pool_reuses_returned_clients() {
        let created = Arc::new(AtomicUsize::new(0));
        let created_factory = created.clone();
        let pool = ClientPool::new(1, Duration::from_millis(50), move || {
            created_factory.fetch_add(1, Ordering::SeqCst)
        });
        assert_eq!(created.load(Ordering::SeqCst), 1);

        {
            let client = pool.acquire();
            assert_eq!(*client, 0);
        }
        let client = pool.acquire();
        assert_eq!(*client, 0);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhaustion_creates_ephemeral_client() {
        let created = Arc::new(AtomicUsize::new(0));
        let created_factory = created.clone();
        let pool = ClientPool::new(1, Duration::from_millis(20), move || {
            created_factory.fetch_add(1, Ordering::SeqCst)
        });

        let held = pool.acquire();
        let ephemeral = pool.acquire();
        assert_eq!(*ephemeral, 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        drop(held);
    }
}
