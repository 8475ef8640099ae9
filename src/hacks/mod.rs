//! Hacks that need more than a set of opcodes

pub mod speedhack;

pub use speedhack::{AudioPitch, SpeedControl, Speedhack, SPEEDHACK_ID};
