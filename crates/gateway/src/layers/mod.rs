pub mod execution;
pub mod policy;
pub mod service;
