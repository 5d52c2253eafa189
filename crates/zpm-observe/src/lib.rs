mod logger;
pub use logger::*;

pub mod handlers;
pub use handlers::{MessageLog, log_result, result_logger};
