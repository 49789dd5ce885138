pub mod accounts;
pub mod artifacts;
pub mod data_uri;
pub mod events;
pub mod store;
