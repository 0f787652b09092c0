use crate::peer::PeerId;
use crate::spawn::SpawnError;
use thiserror::Error;

/// Failures of a [`crate::session::PeerSession`] that are not gameplay
/// precondition misses; those stay silent no-ops
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("role already assigned to {0}")]
    AlreadyAssigned(PeerId),

    #[error("no avatar for {0}")]
    UnknownAvatar(PeerId),

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

pub type SessionResult<T> = Result<T, SessionError>;
