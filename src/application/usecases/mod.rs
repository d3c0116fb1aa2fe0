pub mod check_watch;

pub use check_watch::*;
