pub mod control;
pub mod logging;
pub mod server;
pub mod store_forward;
