//! Device Session lifecycle

mod session;

pub use session::{DeviceSession, SessionSettings};
