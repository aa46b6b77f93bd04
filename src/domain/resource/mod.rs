pub mod cluster;
pub mod pool;
pub mod quantity;
pub mod resource_spec;
