pub mod latency;
pub mod whole;
pub mod binary;
pub mod verify;
