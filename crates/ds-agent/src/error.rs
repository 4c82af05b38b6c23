use ds_protocol::WorkerRequest;

/// Convenient Result alias.
pub type KeeperResult<T> = Result<T, KeeperError>;

/// Keep-alive error type.
///
/// Only the bridge and manager produce these; cycle-level fetch failures are
/// recovered in place and never surface as errors.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    /// A control message was sent while no worker holds the command channel.
    /// The manager must observe this and treat the worker as inactive.
    #[error("keep-alive worker is not active")]
    WorkerNotActive,

    /// The worker accepted a request but never replied within the bound.
    #[error("no reply to {0:?} within the reply timeout")]
    ReplyTimeout(WorkerRequest),

    /// The worker dropped the reply channel without answering.
    #[error("worker dropped the reply channel for {0:?}")]
    WorkerGone(WorkerRequest),

    /// The worker answered with a payload the request cannot produce.
    #[error("unexpected reply to {0:?}")]
    UnexpectedReply(WorkerRequest),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
