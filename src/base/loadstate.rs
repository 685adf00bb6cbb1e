/// The current state of a connect attempt.
/// This roughly matches the connect portion of net/base/load_states.h,
/// extended with the two-pass resolution flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Nothing has happened yet.
    #[default]
    Idle,

    /// Asking the destination for an address snapshot.
    /// `forced` is set when the previous pass exhausted every address.
    ResolvingHost { forced: bool },

    /// A connect to the address at `index` of the snapshot is in flight.
    Connecting { index: usize },

    /// Every address of resolution pass `pass` failed.
    Exhausted { pass: u8 },

    /// A socket is connected. Terminal.
    Connected,

    /// The attempt gave up. Terminal.
    Failed,
}

impl LoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Connected | LoadState::Failed)
    }
}
