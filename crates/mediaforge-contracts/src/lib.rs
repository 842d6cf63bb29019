pub mod events;
pub mod models;
pub mod receipts;
pub mod request;
pub mod settings;
