pub mod blueprint;
pub mod file_server;
pub mod mirror;
pub mod offline;
pub mod provision;
pub mod readiness;
pub mod remote;
