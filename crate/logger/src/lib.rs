mod log_utils;

pub use log_utils::{log_init, log_init_with_filter};
pub use tracing::{debug, error, info, trace, warn};
