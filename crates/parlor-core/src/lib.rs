pub mod errors;
pub mod fingerprint;
pub mod frames;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod sentiment;
pub mod stream;
