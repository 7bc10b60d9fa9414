//! JSON export of the resolved model, for tools outside the debugger
//!
//! Addresses, reset values and masks are exported as hexadecimal strings since JSON numbers
//! cannot hold every 64-bit value exactly.

use json::{object, JsonValue};

use crate::model::{Device, EnumeratedValue, Field, Peripheral, Register, RegisterCluster};

pub trait ToJson {
    fn to_json(&self) -> JsonValue;
}

fn hex(value: u64) -> String {
    format!("{value:#x}")
}

impl ToJson for Device {
    fn to_json(&self) -> JsonValue {
        object! {
            name: self.name.as_str(),
            description: self.description.as_str(),
            width: self.width,
            peripherals: self.peripherals.iter().map(|p| p.to_json()).collect::<Vec<_>>()
        }
    }
}

impl ToJson for Peripheral {
    fn to_json(&self) -> JsonValue {
        object! {
            name: self.name.as_str(),
            description: self.description.as_str(),
            group_name: self.group_name.as_deref(),
            derived_from: self.derived_from.as_deref(),
            base_address: hex(self.base_address),
            address_block_size: self.address_block_size.map(hex),
            children: self.children.iter().map(ToJson::to_json).collect::<Vec<_>>()
        }
    }
}

impl ToJson for RegisterCluster {
    fn to_json(&self) -> JsonValue {
        match self {
            Self::Register(r) => r.to_json(),
            Self::Cluster(c) => object! {
                kind: "cluster",
                name: c.name.as_str(),
                description: c.description.as_str(),
                address: hex(c.addr.full()),
                children: c.children.iter().map(ToJson::to_json).collect::<Vec<_>>()
            }
        }
    }
}

impl ToJson for Register {
    fn to_json(&self) -> JsonValue {
        let props = &self.properties;
        object! {
            kind: "register",
            name: self.name.as_str(),
            path: self.path.join("."),
            description: self.description.as_str(),
            address: hex(self.address()),
            size: props.size.value,
            access: props.access.value.as_str(),
            reset_value: hex(props.reset_value.value),
            reset_mask: hex(props.reset_mask.value),
            fields: self.fields.iter().map(ToJson::to_json).collect::<Vec<_>>()
        }
    }
}

impl ToJson for Field {
    fn to_json(&self) -> JsonValue {
        object! {
            name: self.name.as_str(),
            description: self.description.as_str(),
            bit_offset: self.bit_offset,
            bit_width: self.bit_width,
            access: self.access.value.as_str(),
            enumerated_values: self.enumerated_values.iter().map(ToJson::to_json).collect::<Vec<_>>()
        }
    }
}

impl ToJson for EnumeratedValue {
    fn to_json(&self) -> JsonValue {
        object! {
            name: self.name.as_str(),
            description: self.description.as_str(),
            value: self.value,
            is_default: self.is_default
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{config::LoadConfig, frontend::svd::parse_description, resolve::resolve};

    #[test]
    fn exports_nested_model() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <peripherals>
                <peripheral>
                  <name>GPIOA</name>
                  <baseAddress>0x40020000</baseAddress>
                  <registers>
                    <register>
                      <name>MODER</name>
                      <addressOffset>0x0</addressOffset>
                      <access>read-only</access>
                      <fields>
                        <field>
                          <name>MODER0</name>
                          <bitRange>[1:0]</bitRange>
                          <enumeratedValues>
                            <enumeratedValue><name>AF</name><value>3</value></enumeratedValue>
                          </enumeratedValues>
                        </field>
                      </fields>
                    </register>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#};
        let device = resolve(&parse_description(text).unwrap(), &LoadConfig::new()).unwrap();
        let json = device.to_json();
        let moder = &json["peripherals"][0]["children"][0];
        assert_eq!(json["width"], 32);
        assert_eq!(json["peripherals"][0]["base_address"], "0x40020000");
        assert!(json["peripherals"][0]["group_name"].is_null());
        assert_eq!(moder["path"], "GPIOA.MODER");
        assert_eq!(moder["access"], "read-only");
        assert_eq!(moder["fields"][0]["bit_width"], 2);
        assert_eq!(moder["fields"][0]["enumerated_values"][0]["value"], 3);
    }
}
