//! Encodes information about memory mapped peripherals, registers and fields, both as transcribed
//! from the source document ([`raw`]) and after resolution.

mod addr;
mod device;
pub(crate) mod raw;

pub use addr::{AddrRepr, MakeAddrError};
// Anything that's part of the public API of device is also part of the public API of model
pub use device::*;
pub(crate) use device::width_mask;
