/// Data layer: core types, import, cleaning and filtered views.
///
/// Architecture:
/// ```text
///  sensor log (.csv / .txt)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  delimiter, header aliases, numeric coercion → raw Table
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  process  │  masks, flatlines, gaps, resample → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  moving average + exponential smoothing → filtered Table
///   └──────────┘
/// ```

pub mod aliases;
pub mod filter;
pub mod flatline;
pub mod gaps;
pub mod loader;
pub mod masks;
pub mod model;
pub mod process;
pub mod resample;
