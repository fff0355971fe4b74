pub mod branches;
pub mod notifier;
pub mod repo;
pub mod runner;
pub mod status;
pub mod tasks;
