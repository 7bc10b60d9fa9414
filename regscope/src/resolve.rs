//! Turns the unresolved description tree into the address-complete [`Device`] model
//!
//! Resolution is all-or-nothing: the first error aborts it and no partial model is returned.

use std::sync::Arc;

use itertools::Itertools;
use log::{debug, info};

use crate::{
    config::LoadConfig,
    error::{ElementKind, Error},
    model::{
        raw::{
            DimElement, RawCluster, RawDevice, RawEnumeratedValue, RawField, RawPeripheral,
            RawRegister, RawRegisterCluster, RegPropGroup,
        },
        AddrRepr, Cluster, Device, EnumeratedValue, Field, MakeAddrError, Origin, Peripheral,
        Prop, RegPath, Register, RegisterCluster, RegisterProperties,
    },
};

/// Address width assumed when the device does not declare `<width>`
const DEFAULT_ADDR_WIDTH: u32 = 32;

/// An element that can take its contents from a sibling through `derivedFrom`
trait Derive: Clone {
    const KIND: ElementKind;

    fn name(&self) -> &str;
    fn derived_from(&self) -> Option<&str>;
    fn properties(&self) -> &RegPropGroup;

    /// Overlay what `self` declares on top of the fully merged `base`
    ///
    /// Register properties are left as declared on `self`, they are cascaded separately so that
    /// their [`Origin`] can be told apart.
    fn overlay(&self, base: &Self) -> Self;
}

/// A `derivedFrom` chain merged into a single element
struct Derived<T> {
    item: T,
    /// Register properties declared along the chain, nearest ancestor taking precedence
    ancestor_props: RegPropGroup,
}

/// A `derivedFrom` target, with the siblings its own `derivedFrom` is looked up among
type Found<'a, T> = Option<(&'a T, Vec<&'a T>)>;

/// Finds a sibling of `referrer` named `target`, never `referrer` itself
fn find_sibling<'a, T: Derive>(siblings: &[&'a T], referrer: &T, target: &str) -> Option<&'a T> {
    siblings
        .iter()
        .find(|s| !std::ptr::eq(**s, referrer) && s.name().eq_ignore_ascii_case(target))
        .copied()
}

/// Walks the `derivedFrom` chain of `item` and merges it, terminal ancestor first
///
/// Plain names are looked up among the siblings of the element that refers to them. Dotted paths
/// such as `PERIPH.REG` are handed to `qualified`.
fn derive<'a, T: Derive>(
    item: &'a T,
    siblings: Vec<&'a T>,
    qualified: impl Fn(&str) -> Found<'a, T>,
) -> Result<Derived<T>, Error> {
    let mut chain = vec![item];
    let mut scope = siblings;
    let mut current = item;
    while let Some(target) = current.derived_from() {
        let found = if target.contains('.') {
            qualified(target)
        } else {
            find_sibling(&scope, current, target).map(|base| (base, scope.clone()))
        };
        let (base, base_scope) = found.ok_or_else(|| Error::UnresolvedReference {
            kind: T::KIND,
            referrer: current.name().to_owned(),
            target: target.to_owned(),
        })?;
        if let Some(pos) = chain.iter().position(|visited| std::ptr::eq(*visited, base)) {
            let looped = chain[pos..]
                .iter()
                .map(|c| c.name().to_owned())
                .chain(std::iter::once(base.name().to_owned()))
                .collect();
            return Err(Error::CyclicInheritance {
                kind: T::KIND,
                chain: looped,
            });
        }
        chain.push(base);
        scope = base_scope;
        current = base;
    }

    if chain.len() > 1 {
        debug!(
            "{} {} derives from {}",
            T::KIND,
            item.name(),
            chain[1..].iter().map(|c| c.name()).join(" <- ")
        );
    }

    // Unwrap: chain always holds at least `item`
    let (terminal, rest) = chain.split_last().unwrap();
    let merged = rest
        .iter()
        .rev()
        .fold((*terminal).clone(), |base, derived| derived.overlay(&base));
    let ancestor_props = chain[1..]
        .iter()
        .fold(RegPropGroup::default(), |acc, a| acc.or(a.properties()));
    Ok(Derived {
        item: merged,
        ancestor_props,
    })
}

/// Merge `own` on top of `base`: a same-named element replaces the inherited one in place, new
/// elements are appended
fn merge_by_name<T: Clone>(base: &[T], own: &[T], name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut merged = base.to_vec();
    for elem in own {
        match merged
            .iter_mut()
            .find(|m| name(m).eq_ignore_ascii_case(name(elem)))
        {
            Some(slot) => *slot = elem.clone(),
            None => merged.push(elem.clone()),
        }
    }
    merged
}

fn merge_children(
    base: Option<&Vec<RawRegisterCluster>>,
    own: Option<&Vec<RawRegisterCluster>>,
) -> Option<Vec<RawRegisterCluster>> {
    match (base, own) {
        (Some(base), Some(own)) => Some(merge_by_name(base, own, RawRegisterCluster::name)),
        (base, own) => own.or(base).cloned(),
    }
}

impl Derive for RawPeripheral {
    const KIND: ElementKind = ElementKind::Peripheral;

    fn name(&self) -> &str {
        &self.name
    }

    fn derived_from(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn properties(&self) -> &RegPropGroup {
        &self.properties
    }

    fn overlay(&self, base: &Self) -> Self {
        Self {
            name: self.name.clone(),
            derived_from: self.derived_from.clone(),
            description: self.description.clone().or_else(|| base.description.clone()),
            group_name: self.group_name.clone().or_else(|| base.group_name.clone()),
            base_address: self.base_address.or(base.base_address),
            address_block_size: self.address_block_size.or(base.address_block_size),
            properties: self.properties.clone(),
            children: merge_children(base.children.as_ref(), self.children.as_ref()),
        }
    }
}

impl Derive for RawCluster {
    const KIND: ElementKind = ElementKind::Cluster;

    fn name(&self) -> &str {
        &self.name
    }

    fn derived_from(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn properties(&self) -> &RegPropGroup {
        &self.properties
    }

    fn overlay(&self, base: &Self) -> Self {
        Self {
            name: self.name.clone(),
            derived_from: self.derived_from.clone(),
            description: self.description.clone().or_else(|| base.description.clone()),
            address_offset: self.address_offset.or(base.address_offset),
            dim: self.dim.clone().or_else(|| base.dim.clone()),
            properties: self.properties.clone(),
            children: merge_by_name(&base.children, &self.children, RawRegisterCluster::name),
        }
    }
}

impl Derive for RawRegister {
    const KIND: ElementKind = ElementKind::Register;

    fn name(&self) -> &str {
        &self.name
    }

    fn derived_from(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn properties(&self) -> &RegPropGroup {
        &self.properties
    }

    fn overlay(&self, base: &Self) -> Self {
        let fields = match (&base.fields, &self.fields) {
            (Some(base), Some(own)) => Some(merge_by_name(base, own, |f: &RawField| &f.name)),
            (base, own) => own.as_ref().or(base.as_ref()).cloned(),
        };
        Self {
            name: self.name.clone(),
            derived_from: self.derived_from.clone(),
            description: self.description.clone().or_else(|| base.description.clone()),
            address_offset: self.address_offset.or(base.address_offset),
            dim: self.dim.clone().or_else(|| base.dim.clone()),
            properties: self.properties.clone(),
            fields,
        }
    }
}

/// Name of a repeated element's instance
///
/// `[%s]` is replaced whole by the index, e.g. `CH[%s]` -> `CH2`, a bare `%s` is replaced by the
/// index and a name without placeholder gets the index appended.
fn instance_name(name: &str, index: &str) -> String {
    if name.contains("[%s]") {
        name.replace("[%s]", index)
    } else if name.contains("%s") {
        name.replace("%s", index)
    } else {
        format!("{name}{index}")
    }
}

#[test]
fn instance_name_substitutes_index() {
    assert_eq!(instance_name("TIM[%s]", "2"), "TIM2");
    assert_eq!(instance_name("CH%s_CR", "A"), "CHA_CR");
    assert_eq!(instance_name("DATA", "3"), "DATA3");
}

/// An instance of a possibly repeated element
struct Instance {
    name: String,
    description: Option<String>,
    /// Offset of the instance, including the stride
    offset: u64,
}

/// Expands `dim` into one [`Instance`] per index, or a single instance if `dim` is not set
fn instances(
    name: &str,
    description: Option<&String>,
    offset: u64,
    dim: Option<&DimElement>,
) -> Result<Vec<Instance>, MakeAddrError> {
    let Some(dim) = dim else {
        return Ok(vec![Instance {
            name: name.to_owned(),
            description: description.cloned(),
            offset,
        }]);
    };
    dim.indices()
        .iter()
        .enumerate()
        .map(|(i, index)| -> Result<Instance, MakeAddrError> {
            let step = (i as u64).checked_mul(dim.dim_increment);
            let offset = step
                .and_then(|step| offset.checked_add(step))
                .ok_or_else(|| MakeAddrError {
                    src: vec![offset, dim.dim_increment.saturating_mul(i as u64)],
                    size: 64,
                    id: name.to_owned(),
                })?;
            Ok(Instance {
                name: instance_name(name, index),
                description: description.map(|d| d.replace("%s", index)),
                offset,
            })
        })
        .collect()
}

fn as_register(child: &RawRegisterCluster) -> Option<&RawRegister> {
    match child {
        RawRegisterCluster::Register(r) => Some(r),
        RawRegisterCluster::Cluster(_) => None,
    }
}

fn as_cluster(child: &RawRegisterCluster) -> Option<&RawCluster> {
    match child {
        RawRegisterCluster::Cluster(c) => Some(c),
        RawRegisterCluster::Register(_) => None,
    }
}

/// Per-resolution state shared by every level of the tree
struct Resolver<'a> {
    config: &'a LoadConfig,
    /// Address width of the device
    width: u32,
    /// Every peripheral with its own `derivedFrom` chain merged in
    peripherals: &'a [Derived<RawPeripheral>],
}

impl<'a> Resolver<'a> {
    /// Looks up a dotted path such as `TIM1.CR1` or `DMA.CH.CR` among the merged children of the
    /// peripheral named by its first segment, descending through the clusters named in between
    fn qualified<T: Derive + 'a>(
        &self,
        target: &str,
        pick: fn(&RawRegisterCluster) -> Option<&T>,
    ) -> Found<'a, T> {
        let segments = target.split('.').collect_vec();
        let [periph, clusters @ .., name] = segments.as_slice() else {
            return None;
        };
        let peripheral = self
            .peripherals
            .iter()
            .find(|p| p.item.name.eq_ignore_ascii_case(periph))?;
        let mut container: &'a [RawRegisterCluster] = peripheral.item.children.as_deref()?;
        for cluster in clusters {
            container = container
                .iter()
                .filter_map(as_cluster)
                .find(|c| c.name.eq_ignore_ascii_case(cluster))?
                .children
                .as_slice();
        }
        let siblings = container.iter().filter_map(pick).collect_vec();
        let found = siblings
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .copied()?;
        Some((found, siblings))
    }

    fn peripheral(
        &self,
        derived: &Derived<RawPeripheral>,
        device_props: &RegPropGroup,
    ) -> Result<Peripheral, Error> {
        let p = &derived.item;
        let base_address = p
            .base_address
            .expect("non-derived peripherals always declare a base address");
        let props = p.properties.or(&derived.ancestor_props.or(device_props));
        let children = match &p.children {
            Some(children) => {
                self.children(children, &props, &[base_address], &[p.name.clone()])?
            }
            None => vec![],
        };
        Ok(Peripheral {
            name: p.name.clone(),
            description: p.description.clone().unwrap_or_default(),
            group_name: p.group_name.clone(),
            derived_from: p.derived_from.clone(),
            base_address,
            address_block_size: p.address_block_size,
            children,
        })
    }

    /// Resolves the registers and clusters below a peripheral or cluster
    ///
    /// # Arguments
    ///
    /// * `enclosing` - Register properties in effect for the container
    /// * `addr_prefix` - Offsets leading to the container, starting from the peripheral base
    /// * `path_prefix` - Names leading to the container, starting from the peripheral name
    fn children(
        &self,
        children: &[RawRegisterCluster],
        enclosing: &RegPropGroup,
        addr_prefix: &[u64],
        path_prefix: &[String],
    ) -> Result<Vec<RegisterCluster>, Error> {
        let registers = children.iter().filter_map(as_register).collect_vec();
        let clusters = children.iter().filter_map(as_cluster).collect_vec();

        let mut out = vec![];
        for child in children {
            match child {
                RawRegisterCluster::Register(r) => {
                    let derived = derive(r, registers.clone(), |target| {
                        self.qualified(target, as_register)
                    })?;
                    out.extend(
                        self.registers(derived, enclosing, addr_prefix, path_prefix)?
                            .into_iter()
                            .map(RegisterCluster::Register),
                    );
                }
                RawRegisterCluster::Cluster(c) => {
                    let derived = derive(c, clusters.clone(), |target| {
                        self.qualified(target, as_cluster)
                    })?;
                    out.extend(
                        self.clusters(derived, enclosing, addr_prefix, path_prefix)?
                            .into_iter()
                            .map(RegisterCluster::Cluster),
                    );
                }
            }
        }
        Ok(out)
    }

    fn clusters(
        &self,
        derived: Derived<RawCluster>,
        enclosing: &RegPropGroup,
        addr_prefix: &[u64],
        path_prefix: &[String],
    ) -> Result<Vec<Cluster>, Error> {
        let Derived {
            item: c,
            ancestor_props,
        } = derived;
        let props = c.properties.or(&ancestor_props.or(enclosing));
        let offset = c
            .address_offset
            .expect("non-derived clusters always declare an address offset");

        instances(&c.name, c.description.as_ref(), offset, c.dim.as_ref())?
            .into_iter()
            .map(|inst| -> Result<Cluster, Error> {
                let offsets = addr_prefix.iter().copied().chain([inst.offset]).collect_vec();
                let path = path_prefix.iter().cloned().chain([inst.name.clone()]).collect_vec();
                let addr = AddrRepr::from_vec(offsets.clone(), self.width, &path.join("-"))?;
                let children = self.children(&c.children, &props, &offsets, &path)?;
                Ok(Cluster {
                    name: inst.name,
                    description: inst.description.unwrap_or_default(),
                    offset: inst.offset,
                    addr,
                    children,
                })
            })
            .collect()
    }

    fn registers(
        &self,
        derived: Derived<RawRegister>,
        enclosing: &RegPropGroup,
        addr_prefix: &[u64],
        path_prefix: &[String],
    ) -> Result<Vec<Arc<Register>>, Error> {
        let Derived {
            item: r,
            ancestor_props,
        } = derived;
        let inherited = ancestor_props.or(enclosing);
        let config = self.config;
        let properties = RegisterProperties {
            size: Prop::cascade(r.properties.size, inherited.size, config.default_size()),
            access: Prop::cascade(
                r.properties.access,
                inherited.access,
                config.default_access(),
            ),
            reset_value: Prop::cascade(
                r.properties.reset_value,
                inherited.reset_value,
                config.default_reset_value(),
            ),
            reset_mask: Prop::cascade(
                r.properties.reset_mask,
                inherited.reset_mask,
                config.default_reset_mask(),
            ),
        };
        if properties.size.origin == Origin::Defaulted {
            debug!(
                "register {} does not declare a size, defaulting to {} bits",
                r.name, properties.size.value
            );
        }
        let offset = r
            .address_offset
            .expect("non-derived registers always declare an address offset");

        instances(&r.name, r.description.as_ref(), offset, r.dim.as_ref())?
            .into_iter()
            .map(|inst| -> Result<Arc<Register>, Error> {
                let path = RegPath::new(
                    path_prefix
                        .iter()
                        .cloned()
                        .chain([inst.name.clone()])
                        .collect(),
                );
                let uid = path.join("-");
                let offsets = addr_prefix.iter().copied().chain([inst.offset]).collect_vec();
                let addr = AddrRepr::from_vec(offsets, self.width, &uid)?;
                let fields = match &r.fields {
                    Some(fields) => fields
                        .iter()
                        .map(|f| field_instances(f, &uid, &properties))
                        .flatten_ok()
                        .collect::<Result<Vec<_>, _>>()?,
                    None => vec![],
                };
                Ok(Arc::new(Register {
                    name: inst.name,
                    path,
                    description: inst.description.unwrap_or_default(),
                    offset: inst.offset,
                    addr,
                    properties,
                    fields,
                }))
            })
            .collect()
    }
}

/// Expands and validates a field against the resolved properties of its register
fn field_instances(
    f: &RawField,
    register: &str,
    properties: &RegisterProperties,
) -> Result<Vec<Field>, Error> {
    let register_width = properties.size.value;
    let range_err = |field: &str, bit_offset: u64| Error::InvalidFieldRange {
        register: register.to_owned(),
        field: field.to_owned(),
        bit_offset: u32::try_from(bit_offset).unwrap_or(u32::MAX),
        bit_width: f.bit_width,
        register_width,
    };
    let enumerated_values = f
        .enumerated_values
        .iter()
        .map(|e: &RawEnumeratedValue| EnumeratedValue {
            name: e.name.clone(),
            description: e.description.clone().unwrap_or_default(),
            value: e.value,
            is_default: e.is_default,
        })
        .collect_vec();

    instances(
        &f.name,
        f.description.as_ref(),
        u64::from(f.bit_offset),
        f.dim.as_ref(),
    )
    .map_err(|_| range_err(&f.name, u64::MAX))?
    .into_iter()
    .map(|inst| {
        // Overlapping fields are accepted, vendors alias the same bits under several names
        if inst.offset + u64::from(f.bit_width) > u64::from(register_width) {
            return Err(range_err(&inst.name, inst.offset));
        }
        Ok(Field {
            name: inst.name,
            description: inst.description.unwrap_or_default(),
            // Safety: checked against the register width above
            bit_offset: inst.offset as u32,
            bit_width: f.bit_width,
            access: Prop::cascade(f.access, Some(properties.access.value), properties.access.value),
            enumerated_values: enumerated_values.clone(),
        })
    })
    .collect()
}

/// Resolve inheritance and repetition, and compute the address of every register
pub(crate) fn resolve(raw: &RawDevice, config: &LoadConfig) -> Result<Device, Error> {
    let siblings = raw.peripherals.iter().collect_vec();
    let merged = raw
        .peripherals
        .iter()
        .map(|p| derive(p, siblings.clone(), |_| None))
        .collect::<Result<Vec<_>, Error>>()?;
    let resolver = Resolver {
        config,
        width: raw.width.unwrap_or(DEFAULT_ADDR_WIDTH),
        peripherals: &merged,
    };
    let peripherals = merged
        .iter()
        .map(|p| resolver.peripheral(p, &raw.properties).map(Arc::new))
        .collect::<Result<Vec<_>, Error>>()?;

    let device = Device {
        name: raw.name.clone(),
        description: raw.description.clone().unwrap_or_default(),
        width: resolver.width,
        peripherals,
    };
    info!(
        "resolved device {}: {} peripherals, {} registers",
        device.name,
        device.peripherals.len(),
        device.registers().count()
    );
    Ok(device)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::frontend::svd::parse_description;

    fn resolve_text(text: &str) -> Result<Device, Error> {
        let raw = parse_description(text)?;
        resolve(&raw, &LoadConfig::new())
    }

    fn register<'a>(device: &'a Device, periph: &str, reg: &str) -> &'a Register {
        device
            .peripherals
            .iter()
            .find(|p| p.name == periph)
            .and_then(|p| {
                p.registers()
                    .into_iter()
                    .find(|r| r.path.name_in_periph() == reg)
            })
            .unwrap_or_else(|| panic!("no register {periph}.{reg}"))
    }

    const GPIO: &str = indoc! {r#"
        <device>
          <name>STM32F4</name>
          <size>32</size>
          <peripherals>
            <peripheral>
              <name>GPIOA</name>
              <baseAddress>0x40020000</baseAddress>
              <access>read-write</access>
              <registers>
                <register>
                  <name>MODER</name>
                  <addressOffset>0x0</addressOffset>
                  <resetValue>0xA8000000</resetValue>
                  <fields>
                    <field><name>MODER1</name><bitOffset>2</bitOffset><bitWidth>2</bitWidth></field>
                    <field><name>MODER0</name><bitOffset>0</bitOffset><bitWidth>2</bitWidth><access>read-only</access></field>
                  </fields>
                </register>
                <register>
                  <name>IDR</name>
                  <addressOffset>0x10</addressOffset>
                  <access>read-only</access>
                </register>
                <register derivedFrom="IDR">
                  <name>ODR</name>
                  <addressOffset>0x14</addressOffset>
                  <size>16</size>
                </register>
              </registers>
            </peripheral>
            <peripheral derivedFrom="GPIOA">
              <name>GPIOB</name>
              <baseAddress>0x40020400</baseAddress>
            </peripheral>
          </peripherals>
        </device>
    "#};

    #[test]
    fn register_address_is_base_plus_offset() {
        let device = resolve_text(GPIO).unwrap();
        let moder = register(&device, "GPIOA", "MODER");
        assert_eq!(moder.address(), 0x4002_0000);
        assert_eq!(moder.uid(), "GPIOA-MODER");
        assert_eq!(register(&device, "GPIOA", "IDR").address(), 0x4002_0010);
    }

    #[test]
    fn properties_cascade_with_origin() {
        let device = resolve_text(GPIO).unwrap();
        let moder = register(&device, "GPIOA", "MODER");
        assert_eq!(
            moder.properties.size,
            Prop {
                value: 32,
                origin: Origin::Inherited
            }
        );
        assert_eq!(moder.properties.access.origin, Origin::Inherited);
        assert_eq!(
            moder.properties.reset_value,
            Prop {
                value: 0xA800_0000,
                origin: Origin::Declared
            }
        );
        assert_eq!(
            moder.properties.reset_mask,
            Prop {
                value: u64::MAX,
                origin: Origin::Defaulted
            }
        );

        let fields = &moder.fields;
        assert_eq!(fields[0].access.origin, Origin::Inherited);
        assert_eq!(fields[0].access.value, svd::Access::ReadWrite);
        assert_eq!(fields[1].access.origin, Origin::Declared);
        assert_eq!(fields[1].access.value, svd::Access::ReadOnly);
    }

    #[test]
    fn register_derives_from_sibling() {
        let device = resolve_text(GPIO).unwrap();
        let odr = register(&device, "GPIOA", "ODR");
        assert_eq!(odr.address(), 0x4002_0014);
        assert_eq!(odr.bit_width(), 16);
        assert_eq!(odr.properties.size.origin, Origin::Declared);
        assert_eq!(
            odr.properties.access,
            Prop {
                value: svd::Access::ReadOnly,
                origin: Origin::Inherited
            }
        );
    }

    #[test]
    fn derived_peripheral_keeps_relative_layout() {
        let device = resolve_text(GPIO).unwrap();
        let gpioa = &device.peripherals[0];
        let gpiob = &device.peripherals[1];
        assert_eq!(gpiob.derived_from.as_deref(), Some("GPIOA"));
        let layout = |p: &Peripheral| {
            p.registers()
                .iter()
                .map(|r| (r.path.name_in_periph(), r.addr.relative(), r.fields.clone()))
                .collect_vec()
        };
        assert_eq!(layout(gpioa), layout(gpiob));
        assert_eq!(register(&device, "GPIOB", "MODER").address(), 0x4002_0400);
    }

    #[test]
    fn resolution_is_idempotent() {
        let raw = parse_description(GPIO).unwrap();
        let config = LoadConfig::new();
        assert_eq!(resolve(&raw, &config).unwrap(), resolve(&raw, &config).unwrap());
    }

    #[test]
    fn repeated_cluster_addresses_step_by_stride() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <peripherals>
                <peripheral>
                  <name>TIMERS</name>
                  <baseAddress>0x0</baseAddress>
                  <registers>
                    <cluster>
                      <name>TIM[%s]</name>
                      <dim>4</dim>
                      <dimIncrement>0x20</dimIncrement>
                      <addressOffset>0x100</addressOffset>
                      <register><name>CR</name><addressOffset>0x4</addressOffset></register>
                    </cluster>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#};
        let device = resolve_text(text).unwrap();
        let addrs = device.registers().map(|r| r.address()).collect_vec();
        assert_eq!(addrs, [0x104, 0x124, 0x144, 0x164]);
        let cr = register(&device, "TIMERS", "TIM2.CR");
        assert_eq!(cr.addr.offsets(), [0x140, 0x4]);
        assert_eq!(cr.path.segments(), ["TIMERS", "TIM2", "CR"]);
    }

    #[test]
    fn nested_repeated_clusters_carry_every_stride() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <peripherals>
                <peripheral>
                  <name>ADC</name>
                  <baseAddress>0x1000</baseAddress>
                  <registers>
                    <cluster>
                      <name>BANK[%s]</name>
                      <dim>2</dim>
                      <dimIncrement>0x100</dimIncrement>
                      <addressOffset>0x200</addressOffset>
                      <cluster>
                        <name>CH[%s]</name>
                        <dim>3</dim>
                        <dimIncrement>0x20</dimIncrement>
                        <addressOffset>0x10</addressOffset>
                        <register>
                          <name>DR[%s]</name>
                          <dim>2</dim>
                          <dimIncrement>4</dimIncrement>
                          <addressOffset>0x8</addressOffset>
                        </register>
                      </cluster>
                    </cluster>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#};
        let device = resolve_text(text).unwrap();
        let regs = device.registers().collect_vec();
        assert_eq!(regs.len(), 2 * 3 * 2);

        let mut expected = vec![];
        for bank in 0..2u64 {
            for ch in 0..3u64 {
                for dr in 0..2u64 {
                    let offsets = vec![0x200 + bank * 0x100, 0x10 + ch * 0x20, 0x8 + dr * 4];
                    let address = 0x1000 + offsets.iter().sum::<u64>();
                    expected.push((format!("BANK{bank}.CH{ch}.DR{dr}"), address, offsets));
                }
            }
        }
        let actual = regs
            .iter()
            .map(|r| (r.path.name_in_periph(), r.address(), r.addr.offsets().to_vec()))
            .collect_vec();
        assert_eq!(actual, expected);

        let RegisterCluster::Cluster(bank1) = &device.peripherals[0].children[1] else {
            panic!("expected cluster");
        };
        assert_eq!(bank1.name, "BANK1");
        assert_eq!(bank1.addr.full(), 0x1300);
        assert_eq!(bank1.addr.offsets(), [0x300]);
        let RegisterCluster::Cluster(ch2) = &bank1.children[2] else {
            panic!("expected cluster");
        };
        assert_eq!(ch2.name, "CH2");
        assert_eq!(ch2.addr.full(), 0x1350);
        assert_eq!(ch2.addr.offsets(), [0x300, 0x50]);
    }

    const TIMERS: &str = indoc! {r#"
        <device>
          <name>TEST</name>
          <peripherals>
            <peripheral>
              <name>TIM1</name>
              <baseAddress>0x40000000</baseAddress>
              <registers>
                <register>
                  <name>CR1</name>
                  <addressOffset>0x0</addressOffset>
                  <size>16</size>
                  <fields><field><name>CEN</name><bitOffset>0</bitOffset></field></fields>
                </register>
                <register>
                  <name>SR</name>
                  <addressOffset>0x10</addressOffset>
                  <fields><field><name>UIF</name><bitOffset>0</bitOffset></field></fields>
                </register>
              </registers>
            </peripheral>
            <peripheral>
              <name>DMA</name>
              <baseAddress>0x40020000</baseAddress>
              <registers>
                <cluster>
                  <name>CH</name>
                  <addressOffset>0x8</addressOffset>
                  <register>
                    <name>CR</name>
                    <addressOffset>0x0</addressOffset>
                    <fields><field><name>EN</name><bitOffset>0</bitOffset></field></fields>
                  </register>
                </cluster>
              </registers>
            </peripheral>
            <peripheral>
              <name>TIM2</name>
              <baseAddress>0x40000400</baseAddress>
              <registers>
                <register derivedFrom="TIM1.CR1">
                  <name>CR1</name>
                  <addressOffset>0x0</addressOffset>
                </register>
                <register derivedFrom="TIM1.SR">
                  <name>CR2</name>
                  <addressOffset>0x4</addressOffset>
                </register>
                <register>
                  <name>SR</name>
                  <addressOffset>0x10</addressOffset>
                  <fields><field><name>CC1IF</name><bitOffset>1</bitOffset></field></fields>
                </register>
                <register derivedFrom="DMA.CH.CR">
                  <name>DMACR</name>
                  <addressOffset>0x20</addressOffset>
                </register>
              </registers>
            </peripheral>
          </peripherals>
        </device>
    "#};

    #[test]
    fn register_derives_across_peripherals() {
        let device = resolve_text(TIMERS).unwrap();
        let field_names = |r: &Register| r.fields.iter().map(|f| f.name.clone()).collect_vec();

        let cr1 = register(&device, "TIM2", "CR1");
        assert_eq!(cr1.address(), 0x4000_0400);
        assert_eq!(cr1.bit_width(), 16);
        assert_eq!(cr1.properties.size.origin, Origin::Inherited);
        assert_eq!(field_names(cr1), ["CEN"]);

        // The same-named sibling in TIM2 must not shadow the qualified target
        let cr2 = register(&device, "TIM2", "CR2");
        assert_eq!(cr2.address(), 0x4000_0404);
        assert_eq!(field_names(cr2), ["UIF"]);

        let dmacr = register(&device, "TIM2", "DMACR");
        assert_eq!(dmacr.address(), 0x4000_0420);
        assert_eq!(field_names(dmacr), ["EN"]);
    }

    #[test]
    fn qualified_reference_must_resolve() {
        for target in ["TIM1.CR9", "TIM9.CR1", "DMA.CR", "DMA.CH.CR.EN"] {
            let text = TIMERS.replace("TIM1.SR", target);
            assert_eq!(
                resolve_text(&text),
                Err(Error::UnresolvedReference {
                    kind: ElementKind::Register,
                    referrer: "CR2".to_owned(),
                    target: target.to_owned(),
                }),
                "{target}"
            );
        }
    }

    #[test]
    fn register_never_derives_from_itself() {
        let text = TIMERS.replace(r#"derivedFrom="TIM1.CR1""#, r#"derivedFrom="CR1""#);
        assert_eq!(
            resolve_text(&text),
            Err(Error::UnresolvedReference {
                kind: ElementKind::Register,
                referrer: "CR1".to_owned(),
                target: "CR1".to_owned(),
            })
        );

        let text = TIMERS.replace("TIM1.CR1", "TIM2.CR1");
        assert_eq!(
            resolve_text(&text),
            Err(Error::CyclicInheritance {
                kind: ElementKind::Register,
                chain: vec!["CR1".to_owned(), "CR1".to_owned()],
            })
        );
    }

    #[test]
    fn repeated_registers_and_fields_expand() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <peripherals>
                <peripheral>
                  <name>DMA</name>
                  <baseAddress>0x1000</baseAddress>
                  <registers>
                    <register>
                      <name>S%sCR</name>
                      <description>Stream %s control</description>
                      <dim>3</dim>
                      <dimIncrement>0x18</dimIncrement>
                      <dimIndex>A,B,C</dimIndex>
                      <addressOffset>0x10</addressOffset>
                      <fields>
                        <field>
                          <name>EN%s</name>
                          <dim>4</dim>
                          <dimIncrement>2</dimIncrement>
                          <bitOffset>0</bitOffset>
                          <bitWidth>2</bitWidth>
                        </field>
                      </fields>
                    </register>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#};
        let device = resolve_text(text).unwrap();
        let scr = register(&device, "DMA", "SCCR");
        assert_eq!(scr.address(), 0x1000 + 0x10 + 2 * 0x18);
        assert_eq!(scr.description, "Stream C control");
        let offsets = scr
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.bit_offset))
            .collect_vec();
        assert_eq!(offsets, [("EN0", 0), ("EN1", 2), ("EN2", 4), ("EN3", 6)]);
    }

    #[test]
    fn cyclic_inheritance_names_the_loop() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <peripherals>
                <peripheral derivedFrom="B"><name>A</name></peripheral>
                <peripheral derivedFrom="A"><name>B</name></peripheral>
              </peripherals>
            </device>
        "#};
        assert_eq!(
            resolve_text(text),
            Err(Error::CyclicInheritance {
                kind: ElementKind::Peripheral,
                chain: vec!["A".to_owned(), "B".to_owned(), "A".to_owned()],
            })
        );
    }

    #[test]
    fn unknown_base_is_unresolved() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <peripherals>
                <peripheral derivedFrom="UART9"><name>UART1</name></peripheral>
              </peripherals>
            </device>
        "#};
        assert_eq!(
            resolve_text(text),
            Err(Error::UnresolvedReference {
                kind: ElementKind::Peripheral,
                referrer: "UART1".to_owned(),
                target: "UART9".to_owned(),
            })
        );
    }

    #[test]
    fn field_outside_register_is_rejected() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <peripherals>
                <peripheral>
                  <name>P</name>
                  <baseAddress>0</baseAddress>
                  <registers>
                    <register>
                      <name>R</name>
                      <addressOffset>0</addressOffset>
                      <size>16</size>
                      <fields>
                        <field><name>HIGH</name><bitOffset>12</bitOffset><bitWidth>8</bitWidth></field>
                      </fields>
                    </register>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#};
        assert_eq!(
            resolve_text(text),
            Err(Error::InvalidFieldRange {
                register: "P-R".to_owned(),
                field: "HIGH".to_owned(),
                bit_offset: 12,
                bit_width: 8,
                register_width: 16,
            })
        );
    }

    #[test]
    fn address_beyond_device_width_overflows() {
        let text = indoc! {r#"
            <device>
              <name>TEST</name>
              <width>32</width>
              <peripherals>
                <peripheral>
                  <name>P</name>
                  <baseAddress>0xFFFFFFF0</baseAddress>
                  <registers>
                    <register><name>R</name><addressOffset>0x20</addressOffset></register>
                  </registers>
                </peripheral>
              </peripherals>
            </device>
        "#};
        assert!(matches!(resolve_text(text), Err(Error::AddressOverflow(_))));
    }
}
