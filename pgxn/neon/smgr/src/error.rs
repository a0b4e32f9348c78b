use pageserver_api::models::PagestreamDecodeError;
use pageserver_api::reltag::RelTag;
use postgres_ffi_types::BlockNumber;

pub type SmgrResult<T> = Result<T, SmgrError>;

#[derive(Debug, thiserror::Error)]
pub enum SmgrError {
    /// The page server sent something that is not a valid response at this
    /// point of the stream. Version skew or a bug on either side.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The page server answered with an error, or the response could not be
    /// read off the connection. The caller may retry the enclosing operation.
    #[error("{context}: {message}")]
    RemoteIo { context: String, message: String },

    /// A page without WAL coverage was about to leave the buffer cache.
    /// Continuing would lose data; the process must abort.
    #[error("page {blkno} of relation {rel} is evicted with zero LSN")]
    DurabilityViolation { rel: RelTag, blkno: BlockNumber },

    #[error(
        "could not extend file because cluster size limit ({limit_mb} MB) has been exceeded"
    )]
    CapacityExceeded { limit_mb: u64 },

    /// The caller broke the storage manager's calling conventions.
    #[error("{0}")]
    Invariant(String),

    /// Failure of local storage, the WAL or another collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SmgrError {
    pub(crate) fn remote_io(context: impl Into<String>, message: impl Into<String>) -> Self {
        SmgrError::RemoteIo {
            context: context.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        SmgrError::Invariant(msg.into())
    }

    /// Classify a response that failed to decode. Tags that don't belong in
    /// a response are protocol violations; a mangled message is treated like
    /// any other failed read.
    pub(crate) fn from_decode(context: impl Into<String>, err: PagestreamDecodeError) -> Self {
        if err.is_protocol_violation() {
            SmgrError::Protocol(format!("{}: {err}", context.into()))
        } else {
            SmgrError::remote_io(context, format!("malformed response: {err}"))
        }
    }

    /// Must the process abort rather than let the engine carry on?
    pub fn is_fatal(&self) -> bool {
        matches!(self, SmgrError::DurabilityViolation { .. })
    }

    /// Operator guidance to attach to the error report, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            SmgrError::CapacityExceeded { .. } => {
                Some("This limit is defined by the max_cluster_size setting")
            }
            _ => None,
        }
    }
}
