pub mod commands;
#[cfg(feature = "discord")]
pub mod discord;
pub mod handler;

pub use commands::Command;
pub use handler::{CommandContext, CommandHandler};
