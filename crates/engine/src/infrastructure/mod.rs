//! External dependency implementations: ports and their adapters.

pub mod clock;
pub mod comfyui;
pub mod memory_store;
pub mod ollama;
pub mod ports;
pub mod session;
