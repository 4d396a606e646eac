pub mod api;
pub mod cache;
pub mod data;
pub mod error;
pub mod maintenance;
pub mod network;
pub mod request_id;
pub mod shutdown;
pub mod store;
pub mod types;
pub mod utils;
