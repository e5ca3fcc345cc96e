pub mod attendance;
pub mod core;
pub mod export;
pub mod roster;
pub mod session;
pub mod setup;
pub mod sync;
