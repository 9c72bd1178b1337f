pub mod batchitem;
pub mod features;
pub mod prices;
pub mod synthetic;
pub mod windowitem;
