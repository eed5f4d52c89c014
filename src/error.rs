//! Error type shared by the registries, the codec and the forwarder.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::dns::Rcode;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("network {0} has active endpoints")]
    ActiveEndpoints(String),

    #[error("malformed DNS message: {0}")]
    Malformed(&'static str),

    #[error("no response from {server} within {timeout:?}")]
    Timeout { server: SocketAddr, timeout: Duration },

    #[error("upstream {server} answered {rcode:?}")]
    UpstreamRcode { server: SocketAddr, rcode: Rcode },

    #[error("response id {got} from {server} does not match query id {expected}")]
    IdMismatch {
        server: SocketAddr,
        expected: u16,
        got: u16,
    },

    #[error("no external DNS server answered")]
    Exhausted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True for failures that are recovered by moving to the next server.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::UpstreamRcode { .. }
                | Error::IdMismatch { .. }
                | Error::Malformed(_)
                | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
