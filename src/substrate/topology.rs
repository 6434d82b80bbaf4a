//! Machine topology as seen by the runtime.
//!
//! Workers are numbered `0..threads` and grouped into sockets of equal size.
//! The first worker of each socket is that socket's leader; leaders form the
//! funnel points of the abort-escalation trees. Socket counts are supplied by
//! the caller rather than probed from the machine, which keeps placement
//! policies reproducible in tests.

use thiserror::Error;

/// Errors from invalid topology configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// The thread count was zero.
    #[error("thread count must be nonzero")]
    ZeroThreads,
    /// The socket count was zero.
    #[error("socket count must be nonzero")]
    ZeroSockets,
    /// More sockets than threads.
    #[error("socket count {sockets} exceeds thread count {threads}")]
    TooManySockets {
        /// Requested sockets.
        sockets: usize,
        /// Requested threads.
        threads: usize,
    },
    /// Threads do not divide evenly over sockets.
    #[error("thread count {threads} is not divisible by socket count {sockets}")]
    UnevenSockets {
        /// Requested sockets.
        sockets: usize,
        /// Requested threads.
        threads: usize,
    },
}

/// Worker/socket layout for one runtime instance.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    threads: usize,
    sockets: usize,
    per_socket: usize,
    pin: bool,
}

impl Topology {
    /// A flat topology: `threads` workers on a single socket.
    ///
    /// # Errors
    /// Returns [`TopologyError::ZeroThreads`] for `threads == 0`.
    pub fn flat(threads: usize) -> Result<Self, TopologyError> {
        Self::with_sockets(threads, 1)
    }

    /// A topology of `threads` workers spread evenly over `sockets` sockets.
    ///
    /// # Errors
    /// Returns an error when either count is zero, when `sockets > threads`,
    /// or when `threads` is not a multiple of `sockets`.
    pub fn with_sockets(threads: usize, sockets: usize) -> Result<Self, TopologyError> {
        if threads == 0 {
            return Err(TopologyError::ZeroThreads);
        }
        if sockets == 0 {
            return Err(TopologyError::ZeroSockets);
        }
        if sockets > threads {
            return Err(TopologyError::TooManySockets { sockets, threads });
        }
        if threads % sockets != 0 {
            return Err(TopologyError::UnevenSockets { sockets, threads });
        }
        Ok(Self {
            threads,
            sockets,
            per_socket: threads / sockets,
            pin: false,
        })
    }

    /// Requests OS thread pinning (worker `i` to CPU `i`); Linux only,
    /// ignored elsewhere.
    #[must_use]
    pub fn pinned(mut self) -> Self {
        self.pin = true;
        self
    }

    /// Number of workers.
    #[inline]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Number of sockets.
    #[inline]
    pub fn sockets(&self) -> usize {
        self.sockets
    }

    /// Whether workers should be pinned to CPUs.
    #[inline]
    pub(crate) fn pin(&self) -> bool {
        self.pin
    }

    /// Socket housing worker `tid`.
    #[inline]
    pub fn socket_of(&self, tid: usize) -> usize {
        tid / self.per_socket
    }

    /// Leader worker of `socket`.
    #[inline]
    pub fn leader_of_socket(&self, socket: usize) -> usize {
        socket * self.per_socket
    }

    /// Leader worker of the socket housing `tid`.
    #[inline]
    pub fn leader_of(&self, tid: usize) -> usize {
        self.leader_of_socket(self.socket_of(tid))
    }

    /// Whether `tid` leads its socket.
    #[inline]
    pub fn is_leader(&self, tid: usize) -> bool {
        tid == self.leader_of(tid)
    }

    /// The rotating neighbor of `tid`, used as a steal victim.
    #[inline]
    pub fn next(&self, tid: usize) -> usize {
        (tid + 1) % self.threads
    }
}
