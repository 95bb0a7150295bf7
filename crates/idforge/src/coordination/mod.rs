mod client;
mod sequence;
mod session;

pub use client::*;
pub use sequence::*;
pub use session::*;
