pub mod config;
pub mod drive;
pub mod frame;
pub mod util;
pub mod wire;
