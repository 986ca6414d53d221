pub mod context;
pub mod reconciler;
pub mod status;

pub use context::Context;
pub use reconciler::{PassReport, error_policy, reconcile, run_pass};
pub use status::{Observed, Stage};
