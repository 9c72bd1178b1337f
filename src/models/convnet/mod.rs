pub mod block;
pub mod model;
