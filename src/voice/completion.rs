use crate::common::types::{GuildId, StreamId};

/// "The stream started by play call `stream` in `guild` has ended."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub guild: GuildId,
    pub stream: StreamId,
}

/// One-shot completion handle handed to the audio output with each play
/// call.
///
/// `notify` consumes the handle, and dropping an unfired handle notifies as
/// well, so a single play call produces at most one completion from this
/// handle and an output that loses it still reports the stream as ended.
/// The receiving side must still discard completions for streams it no
/// longer considers active.
pub struct CompletionNotifier {
    completion: Option<Completion>,
    tx: flume::Sender<Completion>,
}

impl CompletionNotifier {
    pub fn new(guild: GuildId, stream: StreamId, tx: flume::Sender<Completion>) -> Self {
        Self {
            completion: Some(Completion { guild, stream }),
            tx,
        }
    }

    pub fn stream(&self) -> Option<StreamId> {
        self.completion.map(|c| c.stream)
    }

    pub fn notify(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(completion) = self.completion.take() {
            // Receiver gone means the coordinator is shutting down.
            let _ = self.tx.send(completion);
        }
    }
}

impl Drop for CompletionNotifier {
    fn drop(&mut self) {
        self.fire();
    }
}

impl std::fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("completion", &self.completion)
            .finish()
    }
}
