pub mod outlier;

pub use outlier::{FilterReport, ImpressionBounds, OutlierFilter};
