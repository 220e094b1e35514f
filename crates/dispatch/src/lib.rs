pub mod processor;
pub mod provider;
pub mod resolver;
pub mod store;
