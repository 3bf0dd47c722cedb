pub mod logging;
pub mod watchdog;
