//! Match synthesis strategies
//!
//! The engine asks a [`MatchStrategy`] for a counterpart whenever a rider
//! reports `Looking`. The bundled [`RandomMatcher`] is a stand-in with no
//! driver pool behind it.

use rand::Rng;

use crate::protocol::MatchEvent;

/// Produces a match for a ride request
pub trait MatchStrategy: Send + Sync + 'static {
    /// Pair `rider_id` on `ride_id` with a driver
    fn propose(&self, ride_id: &str, rider_id: &str) -> MatchEvent;
}

/// Invents a driver, plate, ETA and surge multiplier at random
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomMatcher;

impl MatchStrategy for RandomMatcher {
    fn propose(&self, ride_id: &str, rider_id: &str) -> MatchEvent {
        let mut rng = rand::rng();

        MatchEvent {
            ride_id: ride_id.to_string(),
            driver_id: format!("drv-{:06}", rng.random_range(0..900_000)),
            rider_id: rider_id.to_string(),
            vehicle_plate: format!(
                "TN-{:02}-{:04}",
                rng.random_range(0..99),
                rng.random_range(0..9999)
            ),
            eta_seconds: rng.random_range(60..360),
            surge_multiplier: 1.0 + rng.random::<f64>() * 0.5,
        }
    }
}

impl<F> MatchStrategy for F
where
    F: Fn(&str, &str) -> MatchEvent + Send + Sync + 'static,
{
    fn propose(&self, ride_id: &str, rider_id: &str) -> MatchEvent {
        self(ride_id, rider_id)
    }
}
