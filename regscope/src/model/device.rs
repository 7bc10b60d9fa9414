//! Resolved, address-complete model of a device
//!
//! Built once by the resolver and never mutated afterwards. Registers are shared through [`Arc`]
//! so that the model index can hand out references without copying.

use std::sync::Arc;

use itertools::Itertools;

use crate::model::AddrRepr;

/// Where the value of a property came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Defined on the element itself
    Declared,
    /// Taken from an enclosing element or a `derivedFrom` ancestor
    Inherited,
    /// Not defined anywhere in the hierarchy, taken from the load configuration
    Defaulted,
}

/// A property value together with its [`Origin`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prop<T> {
    pub value: T,
    pub origin: Origin,
}

impl<T: Copy> Prop<T> {
    /// Pick the most specific of `own`, `inherited` and `default`
    pub(crate) fn cascade(own: Option<T>, inherited: Option<T>, default: T) -> Self {
        match (own, inherited) {
            (Some(value), _) => Self {
                value,
                origin: Origin::Declared,
            },
            (None, Some(value)) => Self {
                value,
                origin: Origin::Inherited,
            },
            (None, None) => Self {
                value: default,
                origin: Origin::Defaulted,
            },
        }
    }

    pub const fn get(&self) -> T {
        self.value
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub description: String,
    /// Number of bits used to represent addresses on the target
    pub width: u32,
    pub peripherals: Vec<Arc<Peripheral>>,
}

impl Device {
    /// All registers of the device in document order
    pub fn registers(&self) -> impl Iterator<Item = &Arc<Register>> {
        self.peripherals.iter().flat_map(|p| p.registers())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peripheral {
    pub name: String,
    pub description: String,
    pub group_name: Option<String>,
    /// Name of the peripheral this one was derived from, if any
    pub derived_from: Option<String>,
    pub base_address: u64,
    pub address_block_size: Option<u64>,
    pub children: Vec<RegisterCluster>,
}

impl Peripheral {
    /// All registers of the peripheral, including those nested in clusters, in document order
    pub fn registers(&self) -> Vec<&Arc<Register>> {
        let mut out = vec![];
        collect_registers(&self.children, &mut out);
        out
    }
}

fn collect_registers<'a>(children: &'a [RegisterCluster], out: &mut Vec<&'a Arc<Register>>) {
    for child in children {
        match child {
            RegisterCluster::Register(r) => out.push(r),
            RegisterCluster::Cluster(c) => collect_registers(&c.children, out),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterCluster {
    Register(Arc<Register>),
    Cluster(Cluster),
}

/// A resolved cluster instance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    /// Instance name, with any `dim` index substituted
    pub name: String,
    pub description: String,
    /// Offset relative to the enclosing peripheral or cluster, including the instance stride
    pub offset: u64,
    pub addr: AddrRepr,
    pub children: Vec<RegisterCluster>,
}

/// Hierarchical path to a register, e.g. `PERIPH`, `CLUSTER`, `REG`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegPath(Vec<String>);

impl RegPath {
    pub fn new(segments: Vec<String>) -> Self {
        assert!(
            segments.len() >= 2,
            "register path must comprise at least a peripheral and a register"
        );
        Self(segments)
    }

    /// Joins the names of the path elements to one string using a separator
    #[must_use]
    pub fn join(&self, sep: &str) -> String {
        self.0.iter().join(sep)
    }

    pub fn periph(&self) -> &str {
        &self.0[0]
    }

    /// The register's name qualified by its clusters, e.g. `CLUSTER.REG`
    ///
    /// This is the name the register is known by within its peripheral.
    pub fn name_in_periph(&self) -> String {
        self.0[1..].iter().join(".")
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

/// Cascaded register properties
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterProperties {
    /// Register value bit-width
    pub size: Prop<u32>,
    pub access: Prop<svd::Access>,
    pub reset_value: Prop<u64>,
    pub reset_mask: Prop<u64>,
}

/// Represents a single memory-mapped I/O register
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    /// Instance name, with any `dim` index substituted
    pub name: String,
    pub path: RegPath,
    pub description: String,
    /// Offset relative to the enclosing peripheral or cluster, including the instance stride
    pub offset: u64,
    /// Physical address of the register
    pub addr: AddrRepr,
    pub properties: RegisterProperties,
    pub fields: Vec<Field>,
}

impl Register {
    /// Get register's absolute memory address
    pub const fn address(&self) -> u64 {
        self.addr.full()
    }

    pub const fn bit_width(&self) -> u32 {
        self.properties.size.value
    }

    pub const fn access(&self) -> svd::Access {
        self.properties.access.value
    }

    /// Whether reading the register has a defined result
    pub const fn is_readable(&self) -> bool {
        is_read(self.access())
    }

    pub const fn is_writable(&self) -> bool {
        is_write(self.access())
    }

    /// Mask covering every bit of the register
    pub const fn mask(&self) -> u64 {
        width_mask(self.bit_width())
    }

    /// Get register's unique identifier, e.g., PERIPH-CLUSTER-REG
    pub fn uid(&self) -> String {
        self.path.join("-")
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub description: String,
    pub bit_offset: u32,
    pub bit_width: u32,
    /// Field access, inherited from the register if not declared
    pub access: Prop<svd::Access>,
    pub enumerated_values: Vec<EnumeratedValue>,
}

impl Field {
    /// Mask of the field's bits within the register value
    pub const fn mask(&self) -> u64 {
        width_mask(self.bit_width) << self.bit_offset
    }

    /// Extract the field's value from a register value
    pub const fn extract(&self, raw: u64) -> u64 {
        (raw >> self.bit_offset) & width_mask(self.bit_width)
    }

    pub const fn is_readable(&self) -> bool {
        is_read(self.access.value)
    }

    pub const fn is_writable(&self) -> bool {
        is_write(self.access.value)
    }

    /// Entry whose value is exactly `value`
    pub fn enumerated_value(&self, value: u64) -> Option<&EnumeratedValue> {
        self.enumerated_values
            .iter()
            .find(|e| e.value == Some(value))
    }

    /// Entry marked as `isDefault`, used for values without a dedicated entry
    pub fn default_enumerated_value(&self) -> Option<&EnumeratedValue> {
        self.enumerated_values.iter().find(|e| e.is_default)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumeratedValue {
    pub name: String,
    pub description: String,
    /// `None` for an `isDefault` entry without a value of its own
    pub value: Option<u64>,
    pub is_default: bool,
}

/// Mask of the `width` lowest bits
pub(crate) const fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

const fn is_read(access: svd::Access) -> bool {
    matches!(
        access,
        svd::Access::ReadOnly | svd::Access::ReadWrite | svd::Access::ReadWriteOnce
    )
}

const fn is_write(access: svd::Access) -> bool {
    !matches!(access, svd::Access::ReadOnly)
}

#[test]
fn width_mask_covers_full_width() {
    assert_eq!(width_mask(1), 0b1);
    assert_eq!(width_mask(8), 0xff);
    assert_eq!(width_mask(32), 0xffff_ffff);
    assert_eq!(width_mask(64), u64::MAX);
}

#[test]
fn field_extracts_its_bits() {
    let field = Field {
        name: "MODE1".to_owned(),
        description: String::new(),
        bit_offset: 2,
        bit_width: 2,
        access: Prop {
            value: svd::Access::ReadWrite,
            origin: Origin::Inherited,
        },
        enumerated_values: vec![],
    };
    assert_eq!(field.mask(), 0b1100);
    assert_eq!(field.extract(0b1011), 0b10);
    assert_eq!(field.extract(u64::MAX), 0b11);
}
