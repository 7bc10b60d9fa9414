//! CMSIS-SVD loader
//!
//! Transcribes an SVD document into the unresolved [`RawDevice`] tree. No inheritance is resolved
//! and no addresses are computed here.

use std::{collections::HashMap, ops::RangeInclusive};

use itertools::Itertools;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use roxmltree::Document;

use crate::{
    error::{PositionalError, SvdParseError},
    model::raw::{
        DimElement, DimIndex, RawCluster, RawDevice, RawEnumeratedValue, RawField, RawPeripheral,
        RawRegister, RawRegisterCluster, RegPropGroup,
    },
};

type ParseResult<T> = Result<T, PositionalError<SvdParseError>>;

#[derive(Clone, Copy)]
struct XmlNode<'a, 'input>(roxmltree::Node<'a, 'input>);

impl<'a, 'input: 'a> XmlNode<'a, 'input> {
    /// Add text position information to an [`SvdParseError`] converting it into a
    /// [`PositionalError`]
    fn err(&self, e: impl Into<SvdParseError>) -> PositionalError<SvdParseError> {
        e.into().with_node_pos(self.0)
    }

    fn find_text_by_tag_name(&self, tag: &str) -> ParseResult<(&'a str, Self)> {
        self.maybe_find_text_by_tag_name(tag)
            .filter(|(text, _)| !text.is_empty())
            .ok_or_else(|| {
                self.err(SvdParseError::ExpectedTagInElement {
                    elem_name: self.0.tag_name().name().to_owned(),
                    tag: tag.to_owned(),
                })
            })
    }

    fn maybe_find_text_by_tag_name(&self, tag: &str) -> Option<(&'a str, Self)> {
        self.0
            .children()
            .find(|n| n.has_tag_name(tag))
            .map(|n| (n.text().unwrap_or_default().trim(), XmlNode(n)))
    }

    fn children_with_tag_name(&self, tag: &str) -> Vec<Self> {
        self.0
            .children()
            .filter(|n| n.has_tag_name(tag))
            .map(XmlNode)
            .collect_vec()
    }

    fn attribute(&self, name: &str) -> Option<&'a str> {
        self.0.attribute(name).map(str::trim)
    }

    fn name(&self) -> ParseResult<String> {
        Ok(self.find_text_by_tag_name("name")?.0.to_owned())
    }

    fn description(&self) -> Option<String> {
        self.maybe_find_text_by_tag_name("description")
            .map(|(text, _)| normalize_whitespace(text))
    }

    /// Finds a property from this node by `tag`, calling `process` for its contents if present
    ///
    /// Returns an error if value cannot be parsed in a legal way.
    fn process_prop_if_present<T, F>(&self, tag: &str, process: F) -> ParseResult<Option<T>>
    where
        F: Fn(&str) -> Result<T, SvdParseError>,
    {
        self.maybe_find_text_by_tag_name(tag)
            .map(|(s, prop_node)| process(s).map_err(|e| prop_node.err(e)))
            .transpose()
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().join(" ")
}

/// Returns the appropriate multiplier for given character
fn binary_size_mult_from_char(c: char) -> Result<u64, SvdParseError> {
    match c {
        'k' | 'K' => Ok(1024),
        'm' | 'M' => Ok(1024 * 1024),
        'g' | 'G' => Ok(1024 * 1024 * 1024),
        't' | 'T' => Ok(1024 * 1024 * 1024 * 1024),
        _ => Err(SvdParseError::InvalidSizeMultiplierSuffix(c)),
    }
}

#[test]
fn binary_size_mult_from_char_works() {
    assert_eq!(binary_size_mult_from_char('k'), Ok(1024));
    assert_eq!(binary_size_mult_from_char('M'), Ok(1024 * 1024));
    assert_eq!(binary_size_mult_from_char('g'), Ok(1024 * 1024 * 1024));
    assert_eq!(
        binary_size_mult_from_char('t'),
        Ok(1024 * 1024 * 1024 * 1024)
    );
    assert!(binary_size_mult_from_char('x').is_err());
}

lazy_static! {
    /// Regular expression to capture hexadecimal numbers, as defined in CMSIS-SVD schema
    static ref HEX_NONNEG_INT_RE: Regex = Regex::new(
        r"(?x)              # insignificant whitespace
        ^\+?                # zero or one plus sign
        (?:0x|0X)           # hexadecimal prefix
        ([[:xdigit:]]+)     # one or more hexadecimal digits (captured as #1)
        [[:space:]]?        # zero or one of whitespace
        ([kmgtKMGT])?$      # zero or one of kilo, mega, giga, tera identifier (captured as #2)
    ").unwrap();

    /// Regular expression to capture binary numbers, as defined in CMSIS-SVD schema
    static ref BIN_NONNEG_INT_RE: Regex = Regex::new(
        r"(?x)
        ^\+?
        (?:\#|0b|0B)        # binary prefix
        ([01]+)             # one or more binary digits (captured as #1)
        [[:space:]]?
        ([kmgtKMGT])?$
    ").unwrap();

    /// Regular expression to capture decimal numbers, as defined in CMSIS-SVD schema
    static ref DEC_NONNEG_INT_RE: Regex = Regex::new(
        r"(?x)
        ^\+?
        ([[:digit:]]+)      # one or more decimal digits (captured as #1)
        [[:space:]]?
        ([kmgtKMGT])?$
    ").unwrap();

    static ref DIM_INDEX_NUMBERED_RE: Regex =
        Regex::new(r"^(?P<start>[0-9]+)\s*-\s*(?P<end>[0-9]+)$").unwrap();
    static ref DIM_INDEX_LETTERED_RE: Regex =
        Regex::new(r"^(?P<start>[A-Z])\s*-\s*(?P<end>[A-Z])$").unwrap();
    static ref DIM_INDEX_LISTED_RE: Regex =
        Regex::new(r"^[_0-9a-zA-Z]+(\s*,\s*[_0-9a-zA-Z]+)*$").unwrap();

    static ref BIT_RANGE_RE: Regex =
        Regex::new(r"^\[\s*(?P<msb>[0-9]+)\s*:\s*(?P<lsb>[0-9]+)\s*\]$").unwrap();
}

/// Parses a `scaledNonNegativeInteger` from `text`
///
/// Decimal, hexadecimal (`0x`) and binary (`#`) notations are accepted, each with an optional
/// binary scale suffix, e.g., `4k`.
pub(crate) fn parse_nonneg_int(text: &str) -> Result<u64, SvdParseError> {
    let text = text.trim();
    let (radix, captures) = if let Some(captures) = HEX_NONNEG_INT_RE.captures(text) {
        (16, captures)
    } else if let Some(captures) = BIN_NONNEG_INT_RE.captures(text) {
        (2, captures)
    } else if let Some(captures) = DEC_NONNEG_INT_RE.captures(text) {
        (10, captures)
    } else {
        return Err(SvdParseError::InvalidNonnegInt(text.to_owned()));
    };

    let number = u64::from_str_radix(&captures[1], radix)?;

    let size_mult = captures
        .get(2)
        .and_then(|s| s.as_str().chars().next())
        .map(binary_size_mult_from_char)
        .transpose()?;

    match size_mult {
        Some(mult) => number
            .checked_mul(mult)
            .ok_or_else(|| SvdParseError::OutOfRange(text.to_owned())),
        None => Ok(number),
    }
}

#[test]
fn parse_nonneg_int_works() {
    assert_eq!(parse_nonneg_int("0xFFB00000").unwrap(), 0xFFB0_0000);
    assert_eq!(parse_nonneg_int("+0xFFB00000").unwrap(), 0xFFB0_0000);
    assert_eq!(parse_nonneg_int("#1010").unwrap(), 0b1010);
    assert_eq!(parse_nonneg_int("42").unwrap(), 42);
    assert_eq!(parse_nonneg_int(" 42\n").unwrap(), 42);
    assert_eq!(parse_nonneg_int("1 k").unwrap(), 1024);
    assert_eq!(parse_nonneg_int("4K").unwrap(), 4096);
    assert_eq!(parse_nonneg_int("437260288").unwrap(), 437_260_288);
    assert!(parse_nonneg_int("0x").is_err());
    assert!(parse_nonneg_int("forty").is_err());
    assert!(parse_nonneg_int("-1").is_err());
    assert!(parse_nonneg_int("0x1FFFFFFFFFFFFFFFF").is_err());
}

fn parse_u32(text: &str) -> Result<u32, SvdParseError> {
    let value = parse_nonneg_int(text)?;
    u32::try_from(value).map_err(|_| SvdParseError::OutOfRange(text.to_owned()))
}

/// Parses the value of an `enumeratedValue`
///
/// Returns `None` for binary values with don't-care bits, e.g., `#1x0`, which cannot be matched
/// against a single integer.
fn parse_enum_value(text: &str) -> Result<Option<u64>, SvdParseError> {
    if text.starts_with('#') && text.contains(['x', 'X']) {
        return Ok(None);
    }
    parse_nonneg_int(text).map(Some)
}

#[test]
fn enum_values_with_dont_care_bits_are_skipped() {
    assert_eq!(parse_enum_value("#1x0"), Ok(None));
    assert_eq!(parse_enum_value("#110"), Ok(Some(6)));
    assert_eq!(parse_enum_value("0b11"), Ok(Some(3)));
    assert_eq!(parse_enum_value("0x3"), Ok(Some(3)));
}

fn parse_bool(text: &str) -> Result<bool, SvdParseError> {
    match text {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(SvdParseError::InvalidBool(other.to_owned())),
    }
}

fn parse_access(text: &str) -> Result<svd::Access, SvdParseError> {
    svd::Access::parse_str(text).ok_or_else(|| SvdParseError::InvalidAccessType(text.to_owned()))
}

fn parse_register_size(text: &str) -> Result<u32, SvdParseError> {
    let size = parse_nonneg_int(text)?;
    match u32::try_from(size) {
        Ok(size) if (1..=64).contains(&size) => Ok(size),
        _ => Err(SvdParseError::InvalidRegisterSize(size)),
    }
}

fn parse_dim_index(text: &str) -> Result<DimIndex, SvdParseError> {
    if let Some(captures) = DIM_INDEX_NUMBERED_RE.captures(text) {
        let start: u64 = captures["start"].parse()?;
        let end: u64 = captures["end"].parse()?;
        if start > end {
            return Err(SvdParseError::InvalidDimIndex(text.to_owned()));
        }
        Ok(DimIndex::NumberRange(start..=end))
    } else if let Some(captures) = DIM_INDEX_LETTERED_RE.captures(text) {
        // Safety: regex only matches a single character for each
        let start = captures["start"].chars().next().unwrap();
        let end = captures["end"].chars().next().unwrap();
        if start > end {
            return Err(SvdParseError::InvalidDimIndex(text.to_owned()));
        }
        Ok(DimIndex::LetterRange(start..=end))
    } else if DIM_INDEX_LISTED_RE.is_match(text) {
        Ok(DimIndex::List(
            text.split(',').map(|s| s.trim().to_owned()).collect(),
        ))
    } else {
        Err(SvdParseError::InvalidDimIndex(text.to_owned()))
    }
}

#[test]
fn parse_dim_index_works() {
    assert_eq!(parse_dim_index("0-3"), Ok(DimIndex::NumberRange(0..=3)));
    assert_eq!(parse_dim_index("A-D"), Ok(DimIndex::LetterRange('A'..='D')));
    assert_eq!(
        parse_dim_index("A, B,_C"),
        Ok(DimIndex::List(vec![
            "A".to_owned(),
            "B".to_owned(),
            "_C".to_owned()
        ]))
    );
    assert!(parse_dim_index("3-0").is_err());
    assert!(parse_dim_index("A-").is_err());
}

fn check_node_count(
    node: &XmlNode,
    node_name: &str,
    vector: &[XmlNode],
    expected_count: RangeInclusive<usize>,
) -> ParseResult<()> {
    let actual_count = vector.len();
    if expected_count.contains(&actual_count) {
        Ok(())
    } else {
        Err(node.err(SvdParseError::InvalidNodeCount {
            node_name: node_name.to_owned(),
            expected_count,
            actual_count,
        }))
    }
}

/// Reads the register properties defined directly on `node`
///
/// `node` can be a device, peripheral, cluster or register node.
fn reg_props_from_node(node: &XmlNode) -> ParseResult<RegPropGroup> {
    Ok(RegPropGroup {
        size: node.process_prop_if_present("size", parse_register_size)?,
        access: node.process_prop_if_present("access", parse_access)?,
        reset_value: node.process_prop_if_present("resetValue", parse_nonneg_int)?,
        reset_mask: node.process_prop_if_present("resetMask", parse_nonneg_int)?,
    })
}

/// Upper bound on the instance count of a single `dim` element
const MAX_DIM: u64 = 1 << 16;

fn dim_element_from_node(node: &XmlNode) -> ParseResult<Option<DimElement>> {
    let Some(dim) = node.process_prop_if_present("dim", parse_nonneg_int)? else {
        return Ok(None);
    };
    let dim_increment = {
        let (dim_inc, dim_inc_node) = node.find_text_by_tag_name("dimIncrement")?;
        parse_nonneg_int(dim_inc).map_err(|e| dim_inc_node.err(e))?
    };
    if dim > MAX_DIM || dim.checked_mul(dim_increment).is_none() {
        return Err(node.err(SvdParseError::DimTooLarge {
            dim,
            dim_increment,
            max: MAX_DIM,
        }));
    }
    let dim_index = match node.maybe_find_text_by_tag_name("dimIndex") {
        Some((text, index_node)) => {
            let index = parse_dim_index(text).map_err(|e| index_node.err(e))?;
            if index.len() != dim {
                return Err(index_node.err(SvdParseError::DimIndexCountMismatch {
                    dim,
                    actual: index.len(),
                }));
            }
            Some(index)
        }
        None => None,
    };
    Ok(Some(DimElement {
        dim,
        dim_increment,
        dim_index,
    }))
}

/// Width of the inclusive bit range `msb..=lsb`, `None` if `msb` is below `lsb` or the width does
/// not fit in a `u32`
fn width_from_msb_lsb(msb: u32, lsb: u32) -> Option<u32> {
    msb.checked_sub(lsb).and_then(|d| d.checked_add(1))
}

#[test]
fn width_from_msb_lsb_works() {
    assert_eq!(width_from_msb_lsb(7, 0), Some(8));
    assert_eq!(width_from_msb_lsb(3, 3), Some(1));
    assert_eq!(width_from_msb_lsb(0, 1), None);
    assert_eq!(width_from_msb_lsb(u32::MAX, 0), None);
}

/// Returns the `(bit_offset, bit_width)` of a field
///
/// Any of the three CMSIS-SVD notations is accepted: `bitOffset` + `bitWidth`, `bitRange` or
/// `lsb` + `msb`.
fn bit_range_from_node(node: &XmlNode) -> ParseResult<(u32, u32)> {
    let (offset, width) = if let Some(offset) =
        node.process_prop_if_present("bitOffset", parse_u32)?
    {
        let width = node
            .process_prop_if_present("bitWidth", parse_u32)?
            .unwrap_or(1);
        (offset, width)
    } else if let Some((range, range_node)) = node.maybe_find_text_by_tag_name("bitRange") {
        let captures = BIT_RANGE_RE
            .captures(range)
            .ok_or_else(|| range_node.err(SvdParseError::InvalidBitRange(range.to_owned())))?;
        let msb: u32 = captures["msb"].parse::<u32>().map_err(|e| range_node.err(e))?;
        let lsb: u32 = captures["lsb"].parse::<u32>().map_err(|e| range_node.err(e))?;
        let width = width_from_msb_lsb(msb, lsb)
            .ok_or_else(|| range_node.err(SvdParseError::InvalidBitRange(range.to_owned())))?;
        (lsb, width)
    } else if let (Some(lsb), Some(msb)) = (
        node.process_prop_if_present("lsb", parse_u32)?,
        node.process_prop_if_present("msb", parse_u32)?,
    ) {
        let width = width_from_msb_lsb(msb, lsb).ok_or_else(|| {
            node.err(SvdParseError::InvalidBitRange(format!("lsb {lsb}, msb {msb}")))
        })?;
        (lsb, width)
    } else {
        return Err(node.err(SvdParseError::MissingBitRange));
    };

    if width == 0 || offset.checked_add(width).map_or(true, |end| end > 64) {
        return Err(node.err(SvdParseError::InvalidBitRange(format!(
            "offset {offset}, width {width}"
        ))));
    }
    Ok((offset, width))
}

fn enumerated_values_from_node(field_node: &XmlNode) -> ParseResult<Vec<RawEnumeratedValue>> {
    // Formatting interprets read values, so prefer the block that applies to reads
    let blocks = field_node.children_with_tag_name("enumeratedValues");
    let Some(block) = blocks.iter().find(|b| {
        matches!(
            b.maybe_find_text_by_tag_name("usage").map(|(u, _)| u),
            None | Some("read" | "read-write")
        )
    }) else {
        if !blocks.is_empty() {
            debug!("field has only write-usage enumerated values, ignoring them");
        }
        return Ok(vec![]);
    };
    if let Some(derived_from) = block.attribute("derivedFrom") {
        warn!("enumeratedValues derived from {derived_from:?} are not supported and are ignored");
    }

    let mut values = vec![];
    let mut seen: HashMap<u64, String> = HashMap::new();
    for value_node in block.children_with_tag_name("enumeratedValue") {
        let name = value_node.name()?;
        let is_default = value_node
            .process_prop_if_present("isDefault", parse_bool)?
            .unwrap_or(false);
        let value = match value_node.maybe_find_text_by_tag_name("value") {
            Some((text, node)) => match parse_enum_value(text).map_err(|e| node.err(e))? {
                Some(value) => Some(value),
                None => {
                    warn!("enumerated value {name} = {text} uses don't-care bits and is skipped");
                    continue;
                }
            },
            None if is_default => None,
            None => {
                return Err(value_node.err(SvdParseError::EnumeratedValueWithoutValue(name)));
            }
        };
        if let Some(value) = value {
            if let Some(first) = seen.insert(value, name.clone()) {
                return Err(value_node.err(SvdParseError::DuplicateEnumeratedValue {
                    value,
                    first,
                    second: name,
                }));
            }
        }
        values.push(RawEnumeratedValue {
            name,
            description: value_node.description(),
            value,
            is_default,
        });
    }
    Ok(values)
}

fn field_from_node(node: &XmlNode) -> ParseResult<RawField> {
    let (bit_offset, bit_width) = bit_range_from_node(node)?;
    Ok(RawField {
        name: node.name()?,
        description: node.description(),
        bit_offset,
        bit_width,
        access: node.process_prop_if_present("access", parse_access)?,
        dim: dim_element_from_node(node)?,
        enumerated_values: enumerated_values_from_node(node)?,
    })
}

/// Reads the `addressOffset` of a cluster or register, which may only be omitted when the element
/// derives from another one
fn address_offset_from_node(node: &XmlNode, derived: bool) -> ParseResult<Option<u64>> {
    if derived {
        node.process_prop_if_present("addressOffset", parse_nonneg_int)
    } else {
        let (offset, offset_node) = node.find_text_by_tag_name("addressOffset")?;
        parse_nonneg_int(offset)
            .map(Some)
            .map_err(|e| offset_node.err(e))
    }
}

fn register_from_node(node: &XmlNode) -> ParseResult<RawRegister> {
    let derived_from = node.attribute("derivedFrom").map(str::to_owned);
    let fields = {
        let fields_nodes = node.children_with_tag_name("fields");
        check_node_count(node, "fields", &fields_nodes, 0..=1)?;
        fields_nodes
            .first()
            .map(|fields_node| {
                fields_node
                    .children_with_tag_name("field")
                    .iter()
                    .map(field_from_node)
                    .collect::<ParseResult<Vec<_>>>()
            })
            .transpose()?
    };
    Ok(RawRegister {
        name: node.name()?,
        address_offset: address_offset_from_node(node, derived_from.is_some())?,
        derived_from,
        description: node.description(),
        dim: dim_element_from_node(node)?,
        properties: reg_props_from_node(node)?,
        fields,
    })
}

fn cluster_from_node(node: &XmlNode) -> ParseResult<RawCluster> {
    let derived_from = node.attribute("derivedFrom").map(str::to_owned);
    Ok(RawCluster {
        name: node.name()?,
        address_offset: address_offset_from_node(node, derived_from.is_some())?,
        derived_from,
        description: node.description(),
        dim: dim_element_from_node(node)?,
        properties: reg_props_from_node(node)?,
        children: register_clusters_from_node(node)?,
    })
}

/// Reads the `<register>` and `<cluster>` children of `node` in document order
fn register_clusters_from_node(node: &XmlNode) -> ParseResult<Vec<RawRegisterCluster>> {
    node.0
        .children()
        .filter(roxmltree::Node::is_element)
        .filter_map(|child| {
            let child = XmlNode(child);
            match child.0.tag_name().name() {
                "register" => Some(register_from_node(&child).map(RawRegisterCluster::Register)),
                "cluster" => Some(cluster_from_node(&child).map(RawRegisterCluster::Cluster)),
                _ => None,
            }
        })
        .collect()
}

fn peripheral_from_node(node: &XmlNode) -> ParseResult<RawPeripheral> {
    let name = node.name()?;
    let derived_from = node.attribute("derivedFrom").map(str::to_owned);
    let base_address = if derived_from.is_some() {
        node.process_prop_if_present("baseAddress", parse_nonneg_int)?
    } else {
        let (base_addr_str, base_addr_node) = node.find_text_by_tag_name("baseAddress")?;
        Some(parse_nonneg_int(base_addr_str).map_err(|e| base_addr_node.err(e))?)
    };
    let address_block_size = node
        .children_with_tag_name("addressBlock")
        .first()
        .map(|block| block.process_prop_if_present("size", parse_nonneg_int))
        .transpose()?
        .flatten();
    let children = {
        let registers_nodes = node.children_with_tag_name("registers");
        check_node_count(node, "registers", &registers_nodes, 0..=1)?;
        registers_nodes
            .first()
            .map(register_clusters_from_node)
            .transpose()?
    };
    debug!("read peripheral {name}");
    Ok(RawPeripheral {
        name,
        derived_from,
        description: node.description(),
        group_name: node
            .maybe_find_text_by_tag_name("groupName")
            .map(|(g, _)| g.to_owned()),
        base_address,
        address_block_size,
        properties: reg_props_from_node(node)?,
        children,
    })
}

fn device_from_node(node: &XmlNode) -> ParseResult<RawDevice> {
    let peripherals_nodes = node.children_with_tag_name("peripherals");
    check_node_count(node, "peripherals", &peripherals_nodes, 1..=1)?;
    // Unwrap: count checked above
    let peripherals_node = peripherals_nodes.first().unwrap();
    let peripherals = peripherals_node
        .children_with_tag_name("peripheral")
        .iter()
        .map(peripheral_from_node)
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(RawDevice {
        name: node.name()?,
        description: node.description(),
        width: node.process_prop_if_present("width", parse_u32)?,
        properties: reg_props_from_node(node)?,
        peripherals,
    })
}

/// Transcribe SVD `text` into an unresolved device tree
pub(crate) fn parse_description(text: &str) -> ParseResult<RawDevice> {
    let parsed = Document::parse(text)?;
    let root = XmlNode(parsed.root());
    let device_nodes = root.children_with_tag_name("device");
    check_node_count(&root, "device", &device_nodes, 1..=1)?;
    // Unwrap: count checked above
    device_from_node(device_nodes.first().unwrap())
}
