use core::fmt::{self, Debug, Display};

mod private {
    #[derive(Debug)]
    pub enum Private {}
}

/// The error type used by this crate.
///
/// The command server is generic over a memory device and a serial
/// endpoint; this wraps the failure of either one. Bus-level faults (a
/// stuck line, a missing chip) are not detectable and show up as garbled
/// readback instead.
pub enum Error<M, S> {
    /// A memory-bus operation failed: a GPIO line could not be driven or
    /// sampled.
    Memory(M),

    /// The serial endpoint failed while reading or writing.
    Serial(S),

    #[doc(hidden)]
    __NonExhaustive(private::Private),
}

impl<M, S> Debug for Error<M, S>
where
    M: Debug,
    S: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Memory(mem) => write!(f, "Error::Memory({:?})", mem),
            Error::Serial(serial) => write!(f, "Error::Serial({:?})", serial),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

impl<M, S> Display for Error<M, S>
where
    M: Display,
    S: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Memory(mem) => write!(f, "memory bus error: {}", mem),
            Error::Serial(serial) => write!(f, "serial error: {}", serial),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}
