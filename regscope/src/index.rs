//! Lookup tables over a resolved [`Device`]
//!
//! Names are matched case-insensitively but stored and reported with their original casing.
//! Registers nested in clusters are known by their cluster-qualified name, e.g. `TIM0.CR`.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use itertools::Itertools;
use log::warn;

use crate::{
    error::{Error, Lookup},
    model::{Device, Field, Peripheral, Register},
};

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Immutable, name- and address-indexed view of a device
#[derive(Debug)]
pub struct DeviceIndex {
    device: Device,
    peripherals: HashMap<String, Arc<Peripheral>>,
    /// (peripheral, register) -> register
    registers: HashMap<(String, String), Arc<Register>>,
    /// (peripheral, register, field) -> register and position of the field in it
    fields: HashMap<(String, String, String), (Arc<Register>, usize)>,
    /// Every register, sorted by absolute address
    by_address: Vec<(u64, Arc<Register>)>,
}

impl DeviceIndex {
    /// Build the lookup tables
    ///
    /// On duplicate names the first definition wins; the rest are reported and left out of the
    /// name tables.
    pub fn new(device: Device) -> Self {
        let mut peripherals = HashMap::new();
        let mut registers = HashMap::new();
        let mut fields = HashMap::new();
        let mut by_address = vec![];

        for periph in &device.peripherals {
            match peripherals.entry(key(&periph.name)) {
                Entry::Occupied(_) => {
                    warn!("duplicate peripheral {}, keeping the first one", periph.name);
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(periph));
                }
            }

            for reg in periph.registers() {
                let reg_key = (key(&periph.name), key(&reg.path.name_in_periph()));
                by_address.push((reg.address(), Arc::clone(reg)));
                if registers.contains_key(&reg_key) {
                    warn!("duplicate register {}, keeping the first one", reg.uid());
                    continue;
                }
                registers.insert(reg_key.clone(), Arc::clone(reg));

                for (idx, field) in reg.fields.iter().enumerate() {
                    let field_key = (reg_key.0.clone(), reg_key.1.clone(), key(&field.name));
                    if fields.contains_key(&field_key) {
                        warn!(
                            "duplicate field {} in register {}, keeping the first one",
                            field.name,
                            reg.uid()
                        );
                        continue;
                    }
                    fields.insert(field_key, (Arc::clone(reg), idx));
                }
            }
        }

        // Stable sort keeps document order among registers sharing an address
        by_address.sort_by_key(|(addr, _)| *addr);
        for (addr, group) in &by_address.iter().group_by(|(addr, _)| *addr) {
            let names = group.map(|(_, r)| r.uid()).collect_vec();
            if names.len() > 1 {
                warn!("registers {} share address {addr:#x}", names.join(", "));
            }
        }

        Self {
            device,
            peripherals,
            registers,
            fields,
            by_address,
        }
    }

    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Peripherals in document order
    pub fn peripherals(&self) -> &[Arc<Peripheral>] {
        &self.device.peripherals
    }

    pub fn peripheral(&self, name: &str) -> Result<&Arc<Peripheral>, Error> {
        self.peripherals
            .get(&key(name))
            .ok_or_else(|| Error::NotFound(Lookup::Peripheral(name.to_owned())))
    }

    /// Look up a register by peripheral name and cluster-qualified register name
    pub fn register(&self, periph: &str, reg: &str) -> Result<&Arc<Register>, Error> {
        self.registers
            .get(&(key(periph), key(reg)))
            .ok_or_else(|| {
                // Tell a missing peripheral apart from a missing register
                match self.peripheral(periph) {
                    Err(e) => e,
                    Ok(_) => Error::NotFound(Lookup::Register {
                        peripheral: periph.to_owned(),
                        register: reg.to_owned(),
                    }),
                }
            })
    }

    pub fn field(&self, periph: &str, reg: &str, field: &str) -> Result<&Field, Error> {
        match self.fields.get(&(key(periph), key(reg), key(field))) {
            Some((reg, idx)) => Ok(&reg.fields[*idx]),
            None => {
                self.register(periph, reg)?;
                Err(Error::NotFound(Lookup::Field {
                    peripheral: periph.to_owned(),
                    register: reg.to_owned(),
                    field: field.to_owned(),
                }))
            }
        }
    }

    /// Registers of a peripheral, sorted by address
    pub fn registers_by_address(&self, periph: &str) -> Result<Vec<&Arc<Register>>, Error> {
        let periph = self.peripheral(periph)?;
        let mut regs = periph.registers();
        regs.sort_by_key(|r| r.address());
        Ok(regs)
    }

    /// All registers of the device, sorted by address
    pub fn all_registers_by_address(&self) -> impl Iterator<Item = &Arc<Register>> {
        self.by_address.iter().map(|(_, r)| r)
    }

    /// The register located exactly at `addr`
    ///
    /// If several registers share the address, the first one in document order is returned.
    pub fn register_at(&self, addr: u64) -> Result<&Arc<Register>, Error> {
        let idx = self.by_address.partition_point(|(a, _)| *a < addr);
        match self.by_address.get(idx) {
            Some((a, reg)) if *a == addr => Ok(reg),
            _ => Err(Error::NotFound(Lookup::Address(addr))),
        }
    }

    /// The register with the greatest address not above `addr`
    pub fn register_containing(&self, addr: u64) -> Result<&Arc<Register>, Error> {
        let end = self.by_address.partition_point(|(a, _)| *a <= addr);
        if end == 0 {
            return Err(Error::NotFound(Lookup::Address(addr)));
        }
        let nearest = self.by_address[end - 1].0;
        // First of the registers sharing the nearest address
        let start = self.by_address.partition_point(|(a, _)| *a < nearest);
        Ok(&self.by_address[start].1)
    }

    /// Names of the peripherals starting with `prefix`, sorted alphabetically
    pub fn complete_peripheral(&self, prefix: &str) -> Vec<&str> {
        let prefix = key(prefix);
        self.peripherals
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(_, p)| p.name.as_str())
            .sorted_unstable()
            .collect()
    }

    /// Names of the registers of `periph` starting with `prefix`, sorted alphabetically
    pub fn complete_register(&self, periph: &str, prefix: &str) -> Result<Vec<String>, Error> {
        let periph = key(&self.peripheral(periph)?.name);
        let prefix = key(prefix);
        Ok(self
            .registers
            .iter()
            .filter(|((p, r), _)| *p == periph && r.starts_with(&prefix))
            .map(|(_, reg)| reg.path.name_in_periph())
            .sorted_unstable()
            .collect())
    }
}
