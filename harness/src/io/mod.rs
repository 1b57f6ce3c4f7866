//! Side-effecting boundaries: files, HTTP clients, child processes, simulators.

pub mod assessor;
pub mod completion;
pub mod config;
pub mod frames;
pub mod mock_sim;
pub mod process;
pub mod prompt;
pub mod simulator;
pub mod task_files;
pub mod task_store;
pub mod transport;
