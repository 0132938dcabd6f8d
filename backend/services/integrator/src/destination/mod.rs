pub mod client;
pub mod push;
