pub mod model;
pub mod resolver;
pub mod store;
