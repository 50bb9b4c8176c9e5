pub mod chat;
pub mod currency;
pub mod identity;
pub mod memory_store;
pub mod message;
pub mod pricing;
pub mod product;
pub mod read_state;
pub mod store;
