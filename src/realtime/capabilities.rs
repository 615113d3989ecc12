/// Optional features a backend advertises. Fixed for the lifetime of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RealtimeCapabilities {
    /// `truncate` is accepted.
    pub message_truncation: bool,
    /// The backend detects speech boundaries and may open generations on its own.
    pub turn_detection: bool,
    /// The backend transcribes user audio.
    pub input_transcription: bool,
}

impl RealtimeCapabilities {
    /// Every optional feature enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            message_truncation: true,
            turn_detection: true,
            input_transcription: true,
        }
    }
}
