pub mod bot;
pub mod common;
pub mod configs;
pub mod player;
pub mod sources;
pub mod transport;
pub mod voice;
