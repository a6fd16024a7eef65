pub mod camera;
pub mod cloud;
pub mod config;
pub mod depth;
pub mod error;
pub mod logger;
pub mod marker;
pub mod pipeline;
pub mod reconstruction;
pub mod region;
pub mod registration;

pub use error::{AnchorError, AnchorResult};
pub use logger::{init_logger, init_logger_with_level};
