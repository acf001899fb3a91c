use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy shared by the codec, the walker, the transport and
/// the request window.
///
/// Every variant corresponds to a single negative errno value, exposed by
/// [`Error::errno`].  That mapping is part of the API contract: callers
/// written against the C netlink convention can switch on the errno and
/// get the exact same answers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A message or attribute failed a structural or type-kind check.
    #[error("malformed message or attribute")]
    Malformed,
    /// An attribute payload has an unexpected length.
    #[error("attribute payload length out of range")]
    OutOfRange,
    /// Appending one more attribute would overflow the transfer buffer.
    #[error("message would exceed the transfer buffer capacity")]
    MsgTooLarge,
    /// A link message completed its attribute walk without a name.
    #[error("no such device")]
    NoDevice,
    /// A received datagram was not addressed to this socket's port.
    #[error("datagram source port does not match the bound port")]
    NoProcess,
    /// The kernel interrupted its dump, or a signal interrupted a syscall.
    #[error("interrupted")]
    Interrupted,
    /// The logical message stream is complete; stop feeding the walker.
    /// An ACK is delivered as this with no extra signal.
    #[error("end of data")]
    EndOfData,
    /// The kernel reported data loss; the rest of the datagram is garbage.
    #[error("datagram overrun")]
    Overrun,
    /// A multipart sequence continues in the next datagram.
    #[error("multipart sequence still in progress")]
    InProgress,
    /// An allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// The kernel answered a request with an errno outside the taxonomy.
    /// Holds the normalised negative value.
    #[error("kernel reported error {0}")]
    Kernel(i32),
    /// A transient operating-system failure (EAGAIN, ENOBUFS, ...).
    /// Holds the negative errno.
    #[error("transient os error {0}")]
    Os(i32),
}

impl Error {
    /// The negative errno equivalent of this error.
    pub fn errno(self) -> i32 {
        match self {
            Error::Malformed => -libc::EBADMSG,
            Error::OutOfRange => -libc::ERANGE,
            Error::MsgTooLarge => -libc::EMSGSIZE,
            Error::NoDevice => -libc::ENODEV,
            Error::NoProcess => -libc::ESRCH,
            Error::Interrupted => -libc::EINTR,
            Error::EndOfData => -libc::ENODATA,
            Error::Overrun => -libc::EOVERFLOW,
            Error::InProgress => -libc::EINPROGRESS,
            Error::NoMemory => -libc::ENOMEM,
            Error::Kernel(err) | Error::Os(err) => err,
        }
    }

    /// Map a negative errno back onto the taxonomy.
    ///
    /// Codes without a dedicated variant land in [`Error::Kernel`].
    pub fn from_errno(errno: i32) -> Error {
        debug_assert!(errno < 0);
        match -errno {
            libc::EBADMSG => Error::Malformed,
            libc::ERANGE => Error::OutOfRange,
            libc::EMSGSIZE => Error::MsgTooLarge,
            libc::ENODEV => Error::NoDevice,
            libc::ESRCH => Error::NoProcess,
            libc::EINTR => Error::Interrupted,
            libc::ENODATA => Error::EndOfData,
            libc::EOVERFLOW => Error::Overrun,
            libc::EINPROGRESS => Error::InProgress,
            libc::ENOMEM => Error::NoMemory,
            _ => Error::Kernel(errno),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_round_trips() {
        let all = [
            Error::Malformed,
            Error::OutOfRange,
            Error::MsgTooLarge,
            Error::NoDevice,
            Error::NoProcess,
            Error::Interrupted,
            Error::EndOfData,
            Error::Overrun,
            Error::InProgress,
            Error::NoMemory,
        ];
        for err in all.iter() {
            assert!(err.errno() < 0);
            assert_eq!(Error::from_errno(err.errno()), *err);
        }
    }

    #[test]
    fn unknown_errnos_stay_kernel_errors() {
        let err = Error::from_errno(-libc::EPERM);
        assert_eq!(err, Error::Kernel(-libc::EPERM));
        assert_eq!(err.errno(), -libc::EPERM);
    }
}
