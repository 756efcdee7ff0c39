//! Per-guild playback: sessions, their registry and the coordinator that
//! drives every state transition.

pub mod coordinator;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod session;
pub mod track;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Enqueued, PlaybackCoordinator};
pub use events::{CloseReason, PlaybackEvent};
pub use monitor::InactivityMonitor;
pub use registry::SessionRegistry;
pub use session::{ActiveStream, Session, SessionSnapshot, SessionState};
pub use track::Track;
