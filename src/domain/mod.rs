pub mod error;

pub use error::{ClientError, SchedulerError};
