// Core encoding engine - independent of the front-end

pub mod core;
pub mod probe;
pub mod session;
pub mod worker;

pub use core::*;
pub use session::{Session, SessionStats};
