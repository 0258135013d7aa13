//! Built-in rate providers.

pub mod cross_rate;
pub mod simulated;

pub use cross_rate::CrossRateProvider;
pub use simulated::SimulatedMarketProvider;
