pub mod command;
pub mod feature;
pub mod features;
pub mod filters;
pub mod plt;
pub mod processor;
