use bacstack_core::npdu::RejectReason;
use bacstack_core::EncodeError;
use bacstack_datalink::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("destination cannot be reached from an attached adapter")]
    InvalidDestination,
    #[error("no route to network {network}")]
    NoRouteToNetwork { network: u16 },
    #[error("message to network {network} rejected: {reason}")]
    Rejected { network: u16, reason: RejectReason },
    #[error("request timed out")]
    Timeout,
    #[error("network layer closed")]
    Closed,
}
