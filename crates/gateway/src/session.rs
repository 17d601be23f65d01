/// Logical session state carried across physical connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub resume_url: String,
    /// Last sequence persisted when the previous connection was torn down
    pub last_sequence: u64,
    pub reconnection_attempts: u32,
}

impl SessionContext {
    /// Whether a resume can be attempted
    pub fn is_resumable(&self) -> bool {
        !self.session_id.is_empty()
    }

    /// Forget the session; the attempt counter is kept.
    pub fn clear(&mut self) {
        self.session_id.clear();
        self.resume_url.clear();
        self.last_sequence = 0;
    }
}
