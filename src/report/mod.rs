//! Run reporting

mod summary;

pub use summary::{RunReport, EXIT_ABORTED, EXIT_FAILURE, EXIT_SUCCESS};
