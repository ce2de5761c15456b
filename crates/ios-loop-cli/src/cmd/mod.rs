pub mod config;
pub mod device;
pub mod doctor;
pub mod mcp;
pub mod parse_report;
