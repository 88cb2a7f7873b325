pub mod arima;
pub mod isolation_forest;

pub use arima::{Arima, ArimaFit, ArimaOrder};
pub use isolation_forest::{FittedForest, IsolationForest};
