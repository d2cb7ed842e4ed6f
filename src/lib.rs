pub mod aggregate;
pub mod calculator;
pub mod config;
pub mod errors;
pub mod export;
pub mod history;
pub mod import;
pub mod output;
pub mod report;
pub mod session;
