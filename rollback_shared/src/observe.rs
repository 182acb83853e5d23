//! Tick observers.
//!
//! A small callback registry. Handles come from a counter owned by the registry
//! itself, so two engines never share id space.

/// Opaque subscription handle returned by [`Observers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// Registered callbacks, notified in subscription order.
pub struct Observers<T> {
    next_id: u64,
    callbacks: Vec<(ObserverHandle, Callback<T>)>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            callbacks: Vec::new(),
        }
    }
}

impl<T> Observers<T> {
    /// Registers a callback.
    pub fn subscribe(&mut self, callback: impl FnMut(&T) + Send + 'static) -> ObserverHandle {
        let handle = ObserverHandle(self.next_id);
        self.next_id += 1;
        self.callbacks.push((handle, Box::new(callback)));
        handle
    }

    /// Removes a callback. Returns false if the handle was unknown.
    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(h, _)| *h != handle);
        self.callbacks.len() != before
    }

    /// Invokes every callback with `value`.
    pub fn notify(&mut self, value: &T) {
        for (_, cb) in &mut self.callbacks {
            cb(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<T> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("next_id", &self.next_id)
            .field("len", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn notify_and_unsubscribe() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut obs = Observers::<u32>::default();

        let h1 = {
            let hits = hits.clone();
            obs.subscribe(move |v| {
                hits.fetch_add(*v, Ordering::Relaxed);
            })
        };
        let h2 = {
            let hits = hits.clone();
            obs.subscribe(move |v| {
                hits.fetch_add(*v * 10, Ordering::Relaxed);
            })
        };
        assert_ne!(h1, h2);

        obs.notify(&1);
        assert_eq!(hits.load(Ordering::Relaxed), 11);

        assert!(obs.unsubscribe(h2));
        assert!(!obs.unsubscribe(h2));
        obs.notify(&1);
        assert_eq!(hits.load(Ordering::Relaxed), 12);
    }

    #[test]
    fn handles_are_not_reused() {
        let mut obs = Observers::<()>::default();
        let a = obs.subscribe(|_| {});
        obs.unsubscribe(a);
        let b = obs.subscribe(|_| {});
        assert_ne!(a, b);
    }
}
