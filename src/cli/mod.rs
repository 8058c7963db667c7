pub mod log;
pub mod maintenance;
pub mod stats;
