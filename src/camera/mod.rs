// Camera domain: discovery and capture device sessions.

pub mod backend;
pub mod dummy;
pub mod error;
pub mod types;
