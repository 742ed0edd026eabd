//! The traits used by this crate, for glob import.

pub use crate::image::ImageOps as _;
pub use crate::{DataPin as _, Memory as _, SerialPort as _};
