//! Skiff client application: directory layout, the tick loop, one client
//! session, and the embedded singleplayer server.

pub mod paths;
pub mod session;
pub mod singleplayer;
pub mod tick_loop;
