use std::{fmt, ops};

use itertools::Itertools;
use thiserror::Error;

use crate::model::MakeAddrError;

/// Every way loading, resolving or querying a description can fail
///
/// Loading is all-or-nothing: any of the description errors below means that no model was produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input is not valid XML or violates the structure of a CMSIS-SVD document
    #[error("malformed description --> {0}")]
    MalformedDescription(#[from] PositionalError<SvdParseError>),
    #[error("{kind} {referrer:?} derives from unknown {kind} {target:?}")]
    UnresolvedReference {
        kind: ElementKind,
        referrer: String,
        target: String,
    },
    #[error("cyclic inheritance between {kind}s: {}", .chain.iter().join(" -> "))]
    CyclicInheritance {
        kind: ElementKind,
        /// Names along the loop, starting and ending with the same element
        chain: Vec<String>,
    },
    #[error("field {field:?} of register {register:?} occupies bits {bit_offset}..{} but the register is only {register_width} bits wide", .bit_offset + .bit_width)]
    InvalidFieldRange {
        register: String,
        field: String,
        bit_offset: u32,
        bit_width: u32,
        register_width: u32,
    },
    #[error("address overflows")]
    AddressOverflow(#[from] MakeAddrError),
    #[error("not found: {0}")]
    NotFound(Lookup),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Kind of an element that can take part in `derivedFrom` inheritance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    Peripheral,
    Cluster,
    Register,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peripheral => write!(f, "peripheral"),
            Self::Cluster => write!(f, "cluster"),
            Self::Register => write!(f, "register"),
        }
    }
}

/// The identifier that a failed lookup was searching for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Peripheral(String),
    Register {
        peripheral: String,
        register: String,
    },
    Field {
        peripheral: String,
        register: String,
        field: String,
    },
    Address(u64),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peripheral(p) => write!(f, "peripheral {p:?}"),
            Self::Register {
                peripheral,
                register,
            } => write!(f, "register {register:?} in peripheral {peripheral:?}"),
            Self::Field {
                peripheral,
                register,
                field,
            } => write!(
                f,
                "field {field:?} in register {register:?} in peripheral {peripheral:?}"
            ),
            Self::Address(addr) => write!(f, "register at or below address {addr:#x}"),
        }
    }
}

/// Representation of a file position in an error
///
/// Indexes start from 1:1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Point {
        line: u32,
        col: u32,
    },
    Line {
        line: u32,
        start_col: u32,
        end_col: u32,
    },
    MultiLine {
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    },
}

impl Position {
    /// Line on which the position starts
    pub const fn line(&self) -> u32 {
        match self {
            Self::Point { line, .. } | Self::Line { line, .. } => *line,
            Self::MultiLine { start_line, .. } => *start_line,
        }
    }
}

impl From<roxmltree::TextPos> for Position {
    fn from(value: roxmltree::TextPos) -> Self {
        Self::Point {
            line: value.row,
            col: value.col,
        }
    }
}

impl From<ops::Range<roxmltree::TextPos>> for Position {
    fn from(value: ops::Range<roxmltree::TextPos>) -> Self {
        if value.start.row == value.end.row {
            // Same line, same column --> Point
            if value.start.col == value.end.col {
                Self::Point {
                    line: value.start.row,
                    col: value.start.col,
                }
            }
            // Same line but different column --> Line
            else {
                Self::Line {
                    line: value.start.row,
                    start_col: value.start.col,
                    end_col: value.end.col,
                }
            }
        }
        // Starts and ends on different lines --> MultiLine
        else {
            Self::MultiLine {
                start_line: value.start.row,
                start_col: value.start.col,
                end_line: value.end.row,
                end_col: value.end.col,
            }
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Point { line, col } => write!(f, "{line}:{col}"),
            Self::Line {
                line,
                start_col,
                end_col,
            } => write!(f, "{line}:{start_col}-{end_col}"),
            Self::MultiLine {
                start_line,
                start_col,
                end_line,
                end_col,
            } => write!(f, "{start_line}:{start_col}..{end_line}:{end_col}"),
        }
    }
}

/// An error annotated with where in the source document it happened
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{pos} ({path})\n{err}")]
pub struct PositionalError<T> {
    pub(crate) pos: Position,
    /// Element path, e.g. `device/peripherals/peripheral[GPIOA]/registers/register[MODER]`
    pub(crate) path: String,
    pub(crate) err: T,
}

impl<T> PositionalError<T> {
    pub const fn pos(&self) -> &Position {
        &self.pos
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub const fn inner(&self) -> &T {
        &self.err
    }
}

/// Error that happened during parsing 'CMSIS-SVD'
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum SvdParseError {
    #[error("invalid XML: {0}")]
    Xml(String),
    #[error("expected tag {tag:?} in element {elem_name:?}")]
    ExpectedTagInElement { elem_name: String, tag: String },
    #[error("expected {expected_count:?} of element {node_name:?}, found {actual_count}")]
    InvalidNodeCount {
        node_name: String,
        expected_count: ops::RangeInclusive<usize>,
        actual_count: usize,
    },
    #[error("could not parse int")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("could not parse nonneg int from {0}")]
    InvalidNonnegInt(String),
    #[error("value {0} is out of range")]
    OutOfRange(String),
    #[error("invalid size multiplier suffix: {0}")]
    InvalidSizeMultiplierSuffix(char),
    #[error("invalid access type in input: {0}")]
    InvalidAccessType(String),
    #[error("register size must be within 1..=64 bits, got {0}")]
    InvalidRegisterSize(u64),
    #[error("field does not define a bit range (bitOffset, bitRange or lsb + msb)")]
    MissingBitRange,
    #[error("invalid bit range: {0}")]
    InvalidBitRange(String),
    #[error("unsupported dimIndex format: {0}")]
    InvalidDimIndex(String),
    #[error("dimIndex lists {actual} indices but dim is {dim}")]
    DimIndexCountMismatch { dim: u64, actual: u64 },
    #[error("dim {dim} with dimIncrement {dim_increment} is too large, at most {max} instances are supported")]
    DimTooLarge { dim: u64, dim_increment: u64, max: u64 },
    #[error("enumerated value {value} is defined by both {first:?} and {second:?}")]
    DuplicateEnumeratedValue {
        value: u64,
        first: String,
        second: String,
    },
    #[error("enumerated value {0:?} defines neither a value nor isDefault")]
    EnumeratedValueWithoutValue(String),
    #[error("invalid boolean: {0}")]
    InvalidBool(String),
}

impl SvdParseError {
    /// Convert into positional error, adding row and column information
    pub(crate) fn with_text_pos_range(
        self,
        pos: ops::Range<roxmltree::TextPos>,
        path: String,
    ) -> PositionalError<Self> {
        PositionalError {
            pos: pos.into(),
            path,
            err: self,
        }
    }

    pub(crate) fn with_node_pos(self, node: roxmltree::Node) -> PositionalError<Self> {
        let doc = node.document();
        let byte_pos = node.range();
        let text_pos = ops::Range {
            start: doc.text_pos_at(byte_pos.start),
            end: doc.text_pos_at(byte_pos.end),
        };
        self.with_text_pos_range(text_pos, element_path(node))
    }
}

impl From<roxmltree::Error> for PositionalError<SvdParseError> {
    fn from(value: roxmltree::Error) -> Self {
        Self {
            pos: value.pos().into(),
            path: String::new(),
            err: SvdParseError::Xml(value.to_string()),
        }
    }
}

/// Renders the chain of elements leading to `node`, tagging named elements with their name
fn element_path(node: roxmltree::Node) -> String {
    let mut segments = node
        .ancestors()
        .filter(roxmltree::Node::is_element)
        .map(|n| {
            let tag = n.tag_name().name();
            let name = n
                .children()
                .find(|c| c.has_tag_name("name"))
                .and_then(|c| c.text())
                .map(str::trim);
            match name {
                Some(name) if tag != "name" => format!("{tag}[{name}]"),
                _ => tag.to_owned(),
            }
        })
        .collect_vec();
    segments.reverse();
    segments.join("/")
}

#[test]
fn multi_line_positions_display_as_ranges() {
    let pos: Position = ops::Range {
        start: roxmltree::TextPos::new(3, 5),
        end: roxmltree::TextPos::new(7, 12),
    }
    .into();
    assert_eq!(pos.to_string(), "3:5..7:12");
    assert_eq!(pos.line(), 3);
}

#[test]
fn element_path_names_elements() {
    let doc = roxmltree::Document::parse(
        "<device><peripherals><peripheral><name>GPIOA</name><baseAddress/></peripheral></peripherals></device>",
    )
    .unwrap();
    let base = doc
        .descendants()
        .find(|n| n.has_tag_name("baseAddress"))
        .unwrap();
    assert_eq!(
        element_path(base),
        "device/peripherals/peripheral[GPIOA]/baseAddress"
    );
}
