//! Coalescing of concurrent cache misses.
//!
//! The first request for a key runs the fetch, later requests for the same key
//! wait for its result. If the running request is dropped, one of the waiting
//! requests runs its own fetch instead.
use crate::errors::DispatchError;
use crate::metrics_defs::FETCH_COALESCED;
use crate::output::Image;
use parking_lot::Mutex;
use shared::counter;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

type Flight = Arc<OnceCell<Result<Image, DispatchError>>>;

#[derive(Default)]
pub struct InFlight {
    flights: Mutex<HashMap<String, Flight>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `fetch` unless a fetch for `key` is already running, in which case
    /// its result is returned.
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> Result<Image, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Image, DispatchError>>,
    {
        let flight = self.join(key);
        let guard = FlightGuard {
            in_flight: self,
            key,
            flight: &flight,
        };

        let result = guard.flight.get_or_init(fetch).await.clone();
        drop(guard);
        result
    }

    fn join(&self, key: &str) -> Flight {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(key) {
            counter!(FETCH_COALESCED).increment(1);
            tracing::trace!(key, "waiting for fetch in flight");
            return Arc::clone(flight);
        }
        let flight = Flight::default();
        flights.insert(key.to_string(), Arc::clone(&flight));
        flight
    }

    fn leave(&self, key: &str, flight: &Flight) {
        let mut flights = self.flights.lock();
        // Only the last participant removes the entry. A finished flight that
        // is still registered would hand out a stale result.
        if let Some(current) = flights.get(key)
            && Arc::ptr_eq(current, flight)
            && (flight.initialized() || Arc::strong_count(flight) <= 2)
        {
            flights.remove(key);
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.flights.lock().is_empty()
    }
}

/// Leaves the flight when the request finishes or is dropped.
struct FlightGuard<'a> {
    in_flight: &'a InFlight,
    key: &'a str,
    flight: &'a Flight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.leave(self.key, self.flight);
    }
}
