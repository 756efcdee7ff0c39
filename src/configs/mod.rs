pub mod base;
pub mod bot;
pub mod logging;
pub mod player;
pub mod resolver;
pub mod server;

pub use base::*;
pub use bot::*;
pub use logging::*;
pub use player::*;
pub use resolver::*;
pub use server::*;
