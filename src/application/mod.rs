pub mod engine;
pub mod ports;
pub mod supervisor;
pub mod usecases;

pub use engine::*;
pub use ports::*;
pub use supervisor::*;
