//! Logging macros that delegate to the `log` crate when the `log` feature is
//! enabled, and compile to nothing otherwise. The disabled forms still
//! type-check their arguments.

#![allow(unused_macros)]

#[cfg(feature = "log")]
macro_rules! info {
    ($($args:tt)*) => { ::log::info!($($args)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! info {
    ($($args:tt)*) => {
        if false {
            let _ = format_args!($($args)*);
        }
    };
}

#[cfg(feature = "log")]
macro_rules! trace {
    ($($args:tt)*) => { ::log::trace!($($args)*) };
}

#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($args:tt)*) => {
        if false {
            let _ = format_args!($($args)*);
        }
    };
}
