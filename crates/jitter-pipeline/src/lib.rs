//! End-to-end jitter solving: validated configuration, the driver state
//! machine, and residual/displacement reporting.
//!
//! ```ignore
//! use jitter_pipeline::{JitterConfig, JitterDriver};
//!
//! let config = JitterConfig::default();
//! let mut driver = JitterDriver::new(config, dataset)?;
//! let report = driver.run()?;
//! println!("final cost {}", report.final_cost);
//! ```

pub mod config;
pub mod driver;
pub mod report;

pub use config::JitterConfig;
pub use driver::{JitterDriver, SolveState};
pub use report::{CameraOffset, JitterReport, PixelResidualRecord, TriOffsetStats};
