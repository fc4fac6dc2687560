pub mod heartbeat;
pub mod tracker;
