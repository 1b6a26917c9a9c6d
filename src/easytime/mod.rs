pub mod api_types;
pub mod client;

pub use api_types::TransactionRecord;
pub use client::EasyTimeClient;
