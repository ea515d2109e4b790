//! Property test modules

mod port_tests;
mod retry_tests;
mod scan_machine_tests;
mod series_tests;
