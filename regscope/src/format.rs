//! Rendering raw register values read from a target
//!
//! Formatting is pure: it never touches the model beyond reading it.

use std::fmt;

use strum::{Display, EnumIter, EnumString};

use crate::model::{width_mask, Field, Register};

/// Requested output base
///
/// Parses from single format characters as well as from the full names, ignoring case.
///
/// ```
/// use std::str::FromStr;
/// use regscope::Radix;
///
/// assert_eq!(Radix::from_str("x"), Ok(Radix::Hex));
/// assert_eq!(Radix::from_str("Binary"), Ok(Radix::Binary));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Radix {
    #[default]
    #[strum(to_string = "decimal", serialize = "d", serialize = "dec")]
    Decimal,
    /// `a` (address) renders the same as hex
    #[strum(to_string = "hex", serialize = "x", serialize = "a", serialize = "hexadecimal")]
    Hex,
    #[strum(to_string = "octal", serialize = "o", serialize = "oct")]
    Octal,
    #[strum(to_string = "binary", serialize = "b", serialize = "t", serialize = "bin")]
    Binary,
    /// Names of enumerated values where available; hex for whole registers
    #[strum(to_string = "symbol", serialize = "s", serialize = "sym")]
    Symbol,
}

/// Render `value` in `radix`, zero-padded to represent `bit_width` bits
///
/// Hexadecimal values are prefixed with `0x` and padded to `ceil(bit_width / 4)` uppercase
/// digits, octal to `ceil(bit_width / 3)` digits and binary to exactly `bit_width` digits.
/// Decimal is never padded. [`Radix::Symbol`] falls back to hexadecimal.
pub fn format_value(value: u64, bit_width: u32, radix: Radix) -> String {
    let value = value & width_mask(bit_width);
    let bit_width = bit_width as usize;
    match radix {
        Radix::Decimal => value.to_string(),
        Radix::Hex | Radix::Symbol => format!("0x{value:0w$X}", w = bit_width.div_ceil(4)),
        Radix::Octal => format!("{value:0w$o}", w = bit_width.div_ceil(3)),
        Radix::Binary => format!("{value:0bit_width$b}"),
    }
}

/// How a single field value was rendered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    Numeric(String),
    /// The value matched an enumerated value, or fell back on the field's default entry
    Symbol { name: String, description: String },
    /// Symbolic rendering was requested but no enumerated value matched; holds the decimal value
    Unrecognized(String),
    /// The field or its register is write-only, so the value carries no information
    NotReadable,
}

const NOT_READABLE: &str = "(not readable)";

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(s) => write!(f, "{s}"),
            Self::Symbol { name, .. } => write!(f, "{name}"),
            Self::Unrecognized(s) => write!(f, "{s} (invalid enum value)"),
            Self::NotReadable => write!(f, "{NOT_READABLE}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldReadout {
    pub name: String,
    pub description: String,
    /// Field value extracted from the register value, before rendering
    pub raw: u64,
    pub value: FieldValue,
}

/// A register value rendered together with each of its fields
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisterReadout {
    pub name: String,
    pub description: String,
    /// Register value, masked to the register width
    pub raw: u64,
    /// Whether the register's access allows reading; `value` is `(not readable)` if not
    pub readable: bool,
    pub value: String,
    pub fields: Vec<FieldReadout>,
}

fn format_field(
    field: &Field,
    register_value: u64,
    register_readable: bool,
    radix: Radix,
) -> FieldReadout {
    let raw = field.extract(register_value);
    let value = match radix {
        _ if !register_readable || !field.is_readable() => FieldValue::NotReadable,
        Radix::Symbol if field.enumerated_values.is_empty() => {
            FieldValue::Numeric(raw.to_string())
        }
        Radix::Symbol => match field
            .enumerated_value(raw)
            .or_else(|| field.default_enumerated_value())
        {
            Some(entry) => FieldValue::Symbol {
                name: entry.name.clone(),
                description: entry.description.clone(),
            },
            None => FieldValue::Unrecognized(raw.to_string()),
        },
        radix => FieldValue::Numeric(format_value(raw, field.bit_width, radix)),
    };
    FieldReadout {
        name: field.name.clone(),
        description: field.description.clone(),
        raw,
        value,
    }
}

/// Render a raw value read from `register`, together with each of its fields
///
/// Bits above the register width are discarded before formatting. Write-only registers and
/// fields render as `(not readable)` instead of a value.
pub fn format_register(register: &Register, raw: u64, radix: Radix) -> RegisterReadout {
    let raw = raw & register.mask();
    let readable = register.is_readable();
    let value = if readable {
        format_value(raw, register.bit_width(), radix)
    } else {
        NOT_READABLE.to_owned()
    };
    RegisterReadout {
        name: register.name.clone(),
        description: register.description.clone(),
        raw,
        readable,
        value,
        fields: register
            .fields
            .iter()
            .map(|f| format_field(f, raw, readable, radix))
            .collect(),
    }
}

impl fmt::Display for RegisterReadout {
    /// Aligned table of `NAME: VALUE  description`, register first, then one row per field
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rows = vec![(format!("{}:", self.name), self.value.clone(), &self.description)];
        rows.extend(self.fields.iter().map(|field| {
            let value = match &field.value {
                FieldValue::Symbol { name, description } if !description.is_empty() => {
                    format!("{name} ({description})")
                }
                v => v.to_string(),
            };
            (format!("  {}:", field.name), value, &field.description)
        }));
        let name_w = rows.iter().map(|(n, _, _)| n.len()).max().unwrap_or(0);
        let value_w = rows.iter().map(|(_, v, _)| v.len()).max().unwrap_or(0);

        for (name, value, desc) in &rows {
            let line = format!("{name:<name_w$}  {value:<value_w$}  {desc}");
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;
    use crate::model::{AddrRepr, EnumeratedValue, Origin, Prop, RegPath, RegisterProperties};

    fn prop<T>(value: T) -> Prop<T> {
        Prop {
            value,
            origin: Origin::Declared,
        }
    }

    fn field(name: &str, bit_offset: u32, bit_width: u32, values: &[(&str, u64)]) -> Field {
        Field {
            name: name.to_owned(),
            description: String::new(),
            bit_offset,
            bit_width,
            access: prop(svd::Access::ReadWrite),
            enumerated_values: values
                .iter()
                .map(|(name, value)| EnumeratedValue {
                    name: (*name).to_owned(),
                    description: String::new(),
                    value: Some(*value),
                    is_default: false,
                })
                .collect(),
        }
    }

    fn register(width: u32, fields: Vec<Field>) -> Register {
        Register {
            name: "MODER".to_owned(),
            path: RegPath::new(vec!["GPIOA".to_owned(), "MODER".to_owned()]),
            description: "mode register".to_owned(),
            offset: 0,
            addr: AddrRepr::from_vec(vec![0x4002_0000, 0], 32, "GPIOA-MODER").unwrap(),
            properties: RegisterProperties {
                size: prop(width),
                access: prop(svd::Access::ReadWrite),
                reset_value: prop(0),
                reset_mask: prop(u64::MAX),
            },
            fields,
        }
    }

    #[test]
    fn binary_is_padded_to_width_and_parses_back() {
        for (value, width) in [(0, 1), (5, 8), (0x8001, 16), (0xdead_beef, 32), (u64::MAX, 64)] {
            let s = format_value(value, width, Radix::Binary);
            assert_eq!(s.len(), width as usize);
            assert_eq!(u64::from_str_radix(&s, 2).unwrap(), value);
        }
    }

    #[test]
    fn hex_digit_count_follows_width() {
        assert_eq!(format_value(1, 1, Radix::Hex), "0x1");
        assert_eq!(format_value(0xa, 8, Radix::Hex), "0x0A");
        assert_eq!(format_value(0xbe, 16, Radix::Hex), "0x00BE");
        assert_eq!(format_value(0xbeef, 32, Radix::Hex), "0x0000BEEF");
        assert_eq!(format_value(0xbeef, 32, Radix::Symbol), "0x0000BEEF");
    }

    #[test]
    fn octal_and_decimal() {
        assert_eq!(format_value(8, 8, Radix::Octal), "010");
        assert_eq!(format_value(8, 32, Radix::Octal), "00000000010");
        assert_eq!(format_value(1234, 32, Radix::Decimal), "1234");
    }

    #[test]
    fn symbols_render_enumerated_names() {
        let reg = register(
            32,
            vec![
                field("MODER0", 0, 2, &[("Input", 0), ("Output", 1), ("AF", 3)]),
                field("MODER1", 2, 3, &[("Input", 0), ("AF", 3)]),
                field("OTHER", 5, 3, &[]),
            ],
        );
        let readout = format_register(&reg, 0b110_101_11, Radix::Symbol);
        assert_eq!(
            readout.fields[0].value,
            FieldValue::Symbol {
                name: "AF".to_owned(),
                description: String::new()
            }
        );
        assert_eq!(readout.fields[1].raw, 5);
        assert_eq!(readout.fields[1].value, FieldValue::Unrecognized("5".to_owned()));
        assert_eq!(readout.fields[2].value, FieldValue::Numeric("6".to_owned()));
        assert_eq!(readout.value, "0x000000D7");
    }

    #[test]
    fn default_entry_names_unmatched_values() {
        let mut f = field("MODE", 0, 2, &[("Off", 0)]);
        f.enumerated_values.push(EnumeratedValue {
            name: "Reserved".to_owned(),
            description: String::new(),
            value: None,
            is_default: true,
        });
        let readout = format_register(&register(8, vec![f]), 2, Radix::Symbol);
        assert_eq!(readout.fields[0].value.to_string(), "Reserved");
    }

    #[test]
    fn wide_values_are_truncated_to_register_width() {
        let reg = register(8, vec![field("LOW", 0, 4, &[])]);
        let readout = format_register(&reg, 0x1_2345, Radix::Hex);
        assert_eq!(readout.raw, 0x45);
        assert_eq!(readout.value, "0x45");
        assert_eq!(readout.fields[0].value, FieldValue::Numeric("0x5".to_owned()));
    }

    #[test]
    fn readout_displays_aligned_table() {
        let reg = register(8, vec![field("EN", 0, 1, &[]), field("MODE", 1, 2, &[])]);
        let readout = format_register(&reg, 0b101, Radix::Binary);
        assert_eq!(
            readout.to_string(),
            "MODER:   00000101  mode register\n  EN:    1\n  MODE:  10\n"
        );
    }

    #[test]
    fn write_only_fields_are_not_rendered() {
        let mut ctrl = field("CTRL", 4, 4, &[]);
        ctrl.access = prop(svd::Access::WriteOnly);
        let reg = register(8, vec![field("STAT", 0, 4, &[]), ctrl]);
        let readout = format_register(&reg, 0xA5, Radix::Hex);
        assert!(readout.readable);
        assert_eq!(readout.value, "0xA5");
        assert_eq!(readout.fields[0].value, FieldValue::Numeric("0x5".to_owned()));
        assert_eq!(readout.fields[1].value, FieldValue::NotReadable);
        assert_eq!(
            readout.to_string(),
            "MODER:   0xA5            mode register\n  STAT:  0x5\n  CTRL:  (not readable)\n"
        );
    }

    #[test]
    fn write_only_register_is_not_rendered() {
        for access in [svd::Access::WriteOnly, svd::Access::WriteOnce] {
            let mut reg = register(8, vec![field("EN", 0, 1, &[("On", 1)])]);
            reg.properties.access = prop(access);
            let readout = format_register(&reg, 0x1, Radix::Symbol);
            assert!(!readout.readable);
            assert_eq!(readout.value, "(not readable)");
            assert_eq!(readout.fields[0].value, FieldValue::NotReadable);
            assert_eq!(readout.fields[0].value.to_string(), "(not readable)");
        }
    }

    #[test]
    fn radix_parses_format_characters() {
        assert_eq!(Radix::from_str("x"), Ok(Radix::Hex));
        assert_eq!(Radix::from_str("a"), Ok(Radix::Hex));
        assert_eq!(Radix::from_str("t"), Ok(Radix::Binary));
        assert_eq!(Radix::from_str("O"), Ok(Radix::Octal));
        assert_eq!(Radix::from_str("SYMBOL"), Ok(Radix::Symbol));
        assert!(Radix::from_str("q").is_err());
        for radix in Radix::iter() {
            assert_eq!(Radix::from_str(&radix.to_string()), Ok(radix));
        }
    }
}
