/// Identifier of the user that owns a run, its presets and its outputs.
pub type UserId = String;

/// Per-session context handed to collaborators that scope data by user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionContext {
    pub user_id: UserId,
}

impl SessionContext {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}
