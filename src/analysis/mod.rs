/// Analysis layer: smoothing, AQI, exposure and ventilation.
///
/// Every function here reads a [`Series`](crate::data::model::Series) and
/// returns a new value; nothing mutates the dataset it came from.

pub mod aqi;
pub mod exposure;
pub mod smoothing;
pub mod standards;
pub mod ventilation;
