//! Unresolved description tree, transcribed from the source document as-is
//!
//! Every optional element of the document is an `Option` here: `None` means the element was
//! absent at this level and may still be inherited or defaulted during resolution.

/// Register properties that cascade from device down to register level
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegPropGroup {
    /// Register bit-width
    pub size: Option<u32>,
    /// Register access rights
    pub access: Option<svd::Access>,
    /// Register value after reset
    pub reset_value: Option<u64>,
    /// Register bits with defined reset value are marked as high
    pub reset_mask: Option<u64>,
}

impl RegPropGroup {
    /// Properties of `self`, with any property missing from `self` taken from `base`
    pub fn or(&self, base: &Self) -> Self {
        Self {
            size: self.size.or(base.size),
            access: self.access.or(base.access),
            reset_value: self.reset_value.or(base.reset_value),
            reset_mask: self.reset_mask.or(base.reset_mask),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDevice {
    pub name: String,
    pub description: Option<String>,
    /// Maximum data bit width accessible within a single transfer, also used as address width
    pub width: Option<u32>,
    pub properties: RegPropGroup,
    pub peripherals: Vec<RawPeripheral>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPeripheral {
    pub name: String,
    pub derived_from: Option<String>,
    pub description: Option<String>,
    pub group_name: Option<String>,
    pub base_address: Option<u64>,
    pub address_block_size: Option<u64>,
    pub properties: RegPropGroup,
    /// `None` if the peripheral has no `<registers>` element
    pub children: Option<Vec<RawRegisterCluster>>,
}

/// A child of `<registers>` or `<cluster>`, in document order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawRegisterCluster {
    Register(RawRegister),
    Cluster(RawCluster),
}

impl RawRegisterCluster {
    pub fn name(&self) -> &str {
        match self {
            Self::Register(r) => &r.name,
            Self::Cluster(c) => &c.name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCluster {
    pub name: String,
    pub derived_from: Option<String>,
    pub description: Option<String>,
    pub address_offset: Option<u64>,
    pub dim: Option<DimElement>,
    pub properties: RegPropGroup,
    pub children: Vec<RawRegisterCluster>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRegister {
    pub name: String,
    pub derived_from: Option<String>,
    pub description: Option<String>,
    pub address_offset: Option<u64>,
    pub dim: Option<DimElement>,
    pub properties: RegPropGroup,
    /// `None` if the register has no `<fields>` element
    pub fields: Option<Vec<RawField>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub description: Option<String>,
    pub bit_offset: u32,
    pub bit_width: u32,
    pub access: Option<svd::Access>,
    pub dim: Option<DimElement>,
    pub enumerated_values: Vec<RawEnumeratedValue>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEnumeratedValue {
    pub name: String,
    pub description: Option<String>,
    /// `None` only for `isDefault` entries
    pub value: Option<u64>,
    pub is_default: bool,
}

/// Repetition of an element: `dim` instances, `dim_increment` apart
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimElement {
    pub dim: u64,
    pub dim_increment: u64,
    pub dim_index: Option<DimIndex>,
}

impl DimElement {
    /// Index strings of every instance, in order
    pub fn indices(&self) -> Vec<String> {
        match &self.dim_index {
            Some(index) => index.to_vec(),
            None => (0..self.dim).map(|i| i.to_string()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DimIndex {
    NumberRange(std::ops::RangeInclusive<u64>),
    LetterRange(std::ops::RangeInclusive<char>),
    List(Vec<String>),
}

impl DimIndex {
    /// Number of indices, computed without enumerating them
    pub fn len(&self) -> u64 {
        match self {
            Self::NumberRange(range) => range
                .end()
                .saturating_sub(*range.start())
                .saturating_add(1),
            Self::LetterRange(range) => {
                u64::from(u32::from(*range.end()).saturating_sub(u32::from(*range.start()))) + 1
            }
            Self::List(list) => list.len() as u64,
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::NumberRange(range) => range.clone().map(|i| i.to_string()).collect(),
            Self::LetterRange(range) => range.clone().map(|c| c.to_string()).collect(),
            Self::List(list) => list.clone(),
        }
    }
}

#[test]
fn dim_indices_enumerate_every_instance() {
    let dim = |dim_index| DimElement {
        dim: 3,
        dim_increment: 4,
        dim_index,
    };
    assert_eq!(dim(None).indices(), ["0", "1", "2"]);
    assert_eq!(
        dim(Some(DimIndex::NumberRange(4..=6))).indices(),
        ["4", "5", "6"]
    );
    assert_eq!(
        dim(Some(DimIndex::LetterRange('A'..='C'))).indices(),
        ["A", "B", "C"]
    );
    assert_eq!(DimIndex::LetterRange('A'..='C').len(), 3);
    assert_eq!(DimIndex::NumberRange(0..=99_999_999_999).len(), 100_000_000_000);
    assert_eq!(DimIndex::NumberRange(0..=u64::MAX).len(), u64::MAX);
}
