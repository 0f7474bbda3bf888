pub mod context;
pub mod error;
pub mod gateway;
pub mod layers;

pub use context::ServiceContext;
pub use error::ProcessError;
pub use gateway::Gateway;
pub use layers::execution::command::{Command, CommandResult};
pub use layers::execution::feature::{Feature, FeatureSet};
pub use layers::execution::processor::CommandProcessor;
pub use layers::service::store_forward::MessageProcessor;
