use crate::backend::NodeId;
use thiserror::Error;

/// Failures reported by an [`AudioBackend`](crate::backend::AudioBackend).
///
/// None of these cross the public engine API: the transport controller logs
/// and absorbs them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("audio subsystem unavailable: {0}")]
    Unavailable(String),
    #[error("playback refused until a user gesture")]
    AutoplayBlocked,
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
    #[error("node {0:?} has already been started")]
    AlreadyStarted(NodeId),
    #[error("node {0:?} has already been stopped")]
    AlreadyStopped(NodeId),
    #[error("node {0:?} was stopped before being started")]
    NotStarted(NodeId),
    #[error("node {0:?} is not a scheduled source")]
    NotASource(NodeId),
    #[error("node {node:?} has no {param} parameter")]
    NoSuchParam { node: NodeId, param: &'static str },
    #[error("invalid automation value {0}")]
    InvalidValue(f32),
    #[error("platform error: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown soundscape `{0}`")]
pub struct ParseSoundscapeError(pub String);
