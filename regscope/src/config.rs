use crate::error::Error;

/// Fallback register properties, used when a property is not declared anywhere in the
/// device/peripheral/cluster/register hierarchy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadConfig {
    /// Register bit-width
    size: u32,
    access: svd::Access,
    reset_value: u64,
    /// Register bits with defined reset value are marked as high
    reset_mask: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadConfig {
    /// 32-bit read-write registers with a fully defined reset value of zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            size: 32,
            access: svd::Access::ReadWrite,
            reset_value: 0,
            reset_mask: u64::MAX,
        }
    }

    /// Set the fallback register size
    ///
    /// # Errors
    ///
    /// - `size` is not within 1..=64 bits
    pub fn size(mut self, size: u32) -> Result<Self, Error> {
        if !(1..=64).contains(&size) {
            return Err(Error::InvalidConfig(format!(
                "register size must be within 1..=64 bits, got {size}"
            )));
        }
        self.size = size;
        Ok(self)
    }

    #[must_use]
    pub const fn access(mut self, access: svd::Access) -> Self {
        self.access = access;
        self
    }

    /// Set the fallback reset value
    ///
    /// # Errors
    ///
    /// - `reset_value` does not fit into the fallback register size
    pub fn reset_value(mut self, reset_value: u64) -> Result<Self, Error> {
        if reset_value & !crate::model::width_mask(self.size) != 0 {
            return Err(Error::InvalidConfig(format!(
                "reset value {reset_value:#x} does not fit into {} bits",
                self.size
            )));
        }
        self.reset_value = reset_value;
        Ok(self)
    }

    #[must_use]
    pub const fn reset_mask(mut self, reset_mask: u64) -> Self {
        self.reset_mask = reset_mask;
        self
    }

    pub const fn default_size(&self) -> u32 {
        self.size
    }

    pub const fn default_access(&self) -> svd::Access {
        self.access
    }

    pub const fn default_reset_value(&self) -> u64 {
        self.reset_value
    }

    pub const fn default_reset_mask(&self) -> u64 {
        self.reset_mask
    }
}

#[test]
fn config_rejects_illegal_defaults() {
    assert!(matches!(
        LoadConfig::new().size(0),
        Err(Error::InvalidConfig(_))
    ));
    assert!(LoadConfig::new().size(65).is_err());
    assert!(LoadConfig::new()
        .size(8)
        .and_then(|c| c.reset_value(0x100))
        .is_err());

    let config = LoadConfig::new()
        .size(16)
        .and_then(|c| c.reset_value(0xffff))
        .unwrap();
    assert_eq!(config.default_size(), 16);
    assert_eq!(config.default_reset_value(), 0xffff);
}
