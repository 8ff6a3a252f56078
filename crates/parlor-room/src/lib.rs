pub mod actor;
pub mod error;
pub mod log;
pub mod manager;
pub mod registry;
pub mod tracker;
pub mod turn;

pub use actor::{RoomActor, RoomCommand, RoomHandle};
pub use error::RoomError;
pub use manager::RoomManager;
