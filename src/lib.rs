pub mod audio;
pub mod config;
pub mod errors;
mod lock;
pub mod orchestrator;
pub mod retry;
pub mod socket;
pub mod stt;
mod telemetry;

mod app;

pub use app::logging::{
    crash_log_path, init_logging, log_debug, log_debug_content, log_file_path, log_panic,
};
pub(crate) use lock::lock_or_recover;
