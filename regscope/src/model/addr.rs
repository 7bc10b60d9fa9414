use std::fmt;

use itertools::Itertools;
use thiserror::Error;

/// Valid address representation
///
/// Addresses are kept as the chain of offsets they were composed from: the peripheral base
/// address, one offset per enclosing cluster instance and finally the register offset. The
/// chain is validated on construction, so the full address is always representable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddrRepr {
    /// Consecutive offsets to comprise the full address
    offsets: Vec<u64>,
    /// Absolute address, i.e., the sum of `offsets`
    full: u64,
}

impl AddrRepr {
    /// Returns an error if the address cannot be represented using supplied size
    ///
    /// # Arguments
    ///
    /// * `v` - `Vec` of offsets to comprise the full address
    /// * `size` - Number of bits used to represent this address (target pointer)
    /// * `id` - Identifier reported on failure
    pub fn from_vec(v: Vec<u64>, size: u32, id: &str) -> Result<Self, MakeAddrError> {
        // This would usually be be a library programming error
        assert!(!v.is_empty(), "address must have at least base address");

        let full = make_addr(&v, size, id)?;

        Ok(Self { offsets: v, full })
    }

    /// Get register's absolute memory address
    pub const fn full(&self) -> u64 {
        self.full
    }

    pub fn base(&self) -> u64 {
        self.offsets[0]
    }

    /// Offsets below the base address, outermost first
    pub fn offsets(&self) -> &[u64] {
        &self.offsets[1..]
    }

    /// Address relative to the base address
    pub fn relative(&self) -> u64 {
        self.full - self.base()
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error(
    "could not make components {src:#x?} into an address of size {size} (bits), id: {id:?}"
)]
pub struct MakeAddrError {
    /// Source offsets for the address
    pub(crate) src: Vec<u64>,
    /// Number of bits used to represent this address (target pointer)
    pub(crate) size: u32,
    /// Identifier of the element whose address was being formed
    pub(crate) id: String,
}

fn bits_required(val: u64) -> u32 {
    64 - val.leading_zeros()
}

#[test]
fn bits_required_works() {
    let test = bits_required;

    assert_eq!(test(u64::MAX), 64);
    assert_eq!(test(u32::MAX.into()), 32);
    assert_eq!(test(u16::MAX.into()), 16);
    assert_eq!(test(u8::MAX.into()), 8);
    assert_eq!(test(0b1), 1);
    assert_eq!(test(0b11), 2);
    assert_eq!(test(0b101), 3);
}

/// Construct an address from given offsets
///
/// Validates that the components can form an address that can be represented using the given size
/// (target pointer).
///
/// # Arguments
///
/// * `offsets` - List of offsets to use to form the address
/// * `size` - Number of bits used to represent this address (target pointer)
/// * `id`  - Address identifier for debug and tracing purposes
fn make_addr(offsets: &[u64], size: u32, id: &str) -> Result<u64, MakeAddrError> {
    let err = || MakeAddrError {
        src: offsets.to_vec(),
        size,
        id: id.to_owned(),
    };

    // Add the components together, watching for overflows
    let addr = offsets
        .iter()
        .try_fold(0u64, |acc, x| acc.checked_add(*x))
        .ok_or_else(err)?;

    // Check that `size` can still represent this value
    if bits_required(addr) > size {
        return Err(err());
    }

    Ok(addr)
}

#[test]
fn make_addr_checks_width() {
    assert_eq!(make_addr(&[0x4002_0000, 0x100, 0x4], 32, "x"), Ok(0x4002_0104));
    assert!(make_addr(&[0xffff_ff00, 0x100], 32, "x").is_err());
    assert!(make_addr(&[u64::MAX, 1], 64, "x").is_err());
    assert_eq!(make_addr(&[0xffff_ff00, 0x100], 64, "x"), Ok(0x1_0000_0000));
}

impl fmt::Display for AddrRepr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.offsets().is_empty() {
            write!(f, "{{ base: {:#x} }}", self.base())
        } else {
            write!(
                f,
                "{{ base: {:#x}, offsets: [{}] }}",
                self.base(),
                self.offsets().iter().map(|o| format!("{o:#x}")).join(", ")
            )
        }
    }
}
