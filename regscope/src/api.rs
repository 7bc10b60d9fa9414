//! Exposes functionality supported by this crate
use std::sync::Arc;

use log::info;

use crate::{
    config::LoadConfig, error::Error, frontend::svd::parse_description, index::DeviceIndex,
    resolve::resolve,
};

/// Load a CMSIS-SVD document into an indexed model using the default [`LoadConfig`]
///
/// # Errors
///
/// - The document is not valid XML or not a valid description
/// - Inheritance cannot be resolved, or an address or field is out of range
pub fn load(text: &str) -> Result<DeviceIndex, Error> {
    load_with_config(text, &LoadConfig::new())
}

/// Load a CMSIS-SVD document into an indexed model
///
/// Loading is all-or-nothing: on error no model is produced.
pub fn load_with_config(text: &str, config: &LoadConfig) -> Result<DeviceIndex, Error> {
    let raw = parse_description(text)?;
    let device = resolve(&raw, config)?;
    Ok(DeviceIndex::new(device))
}

/// Run the loader and resolver on `text` without keeping the result
///
/// Good for checking whether a description can be used at all.
pub fn dry_run(text: &str) -> Result<(), Error> {
    load(text).map(|_| ())
}

/// Holds the model of the description currently in use
///
/// A new description replaces the model wholesale, and only if it loads successfully.
#[derive(Debug, Default)]
pub struct Session {
    config: LoadConfig,
    current: Option<Arc<DeviceIndex>>,
}

impl Session {
    pub fn new(config: LoadConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Load `text`, replacing the current model on success
    ///
    /// # Errors
    ///
    /// Any error of [`load_with_config`]. The previously loaded model is kept in that case.
    pub fn load(&mut self, text: &str) -> Result<Arc<DeviceIndex>, Error> {
        let index = Arc::new(load_with_config(text, &self.config)?);
        if let Some(previous) = &self.current {
            info!(
                "replacing device {} with {}",
                previous.device().name,
                index.device().name
            );
        }
        self.current = Some(Arc::clone(&index));
        Ok(index)
    }

    /// The model currently in use, if any description has been loaded
    pub fn current(&self) -> Option<&Arc<DeviceIndex>> {
        self.current.as_ref()
    }
}
