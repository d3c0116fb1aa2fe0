pub mod event;
pub mod fingerprint;
pub mod policy;
pub mod types;
pub mod watch;

pub use event::*;
pub use fingerprint::*;
pub use policy::*;
pub use types::*;
pub use watch::*;
