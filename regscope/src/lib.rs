//! Regscope --- Load CMSIS-SVD descriptions into an address-resolved register model and render
//! raw register values read from a Cortex-M target.
//!
//! ```
//! let index = regscope::load(
//!     "<device><name>DEV</name><peripherals><peripheral>
//!        <name>GPIOA</name><baseAddress>0x40020000</baseAddress>
//!        <registers><register><name>MODER</name><addressOffset>0</addressOffset></register></registers>
//!      </peripheral></peripherals></device>",
//! )
//! .unwrap();
//! let moder = index.register("gpioa", "moder").unwrap();
//! assert_eq!(moder.address(), 0x4002_0000);
//! let readout = regscope::format_register(moder, 0xA800_0000, regscope::Radix::Hex);
//! assert_eq!(readout.value, "0xA8000000");
//! ```

// Export full API at crate root
pub use api::*;
pub use config::LoadConfig;
pub use error::{ElementKind, Error, Lookup, Position, PositionalError, SvdParseError};
pub use format::{format_register, format_value, FieldReadout, FieldValue, Radix, RegisterReadout};
pub use index::DeviceIndex;
pub use model::*;
pub use to_json::ToJson;

mod api;
mod config;
mod error;
mod format;
mod frontend;
mod index;
mod model;
mod resolve;
mod to_json;
