//! Logging facade selection: `defmt` when enabled, `log` otherwise.

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, warn};

#[cfg(not(feature = "defmt"))]
pub(crate) use log::{debug, error, warn};
