// Library exports for presence-ipc
// This allows the test suite and benches to import modules

pub mod cli;
pub mod config;
pub mod ipc;
pub mod pidlock;
pub mod presence;
