pub mod logging;

pub use logging::init_logger;
