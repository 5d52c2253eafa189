//! OS-process variants for the process manager.
//!
//! [`register_all`] wires the `core.system` factory, and `core.container` with
//! the `container` feature, into a [`ProcessManager`].

mod error;
pub use error::{ExecError, ExecResult};

pub mod extension;
pub use extension::register_extension;

pub mod util;
pub mod utils;

pub mod system;
pub use system::{SYSTEM_COMMAND, SystemArgs, SystemProcess};

#[cfg(feature = "container")]
pub mod container;
#[cfg(feature = "container")]
pub use container::{CONTAINER_COMMAND, Channel, ContainerArgs, ContainerProcess};

use zpm_core::ProcessManager;

/// Registers every OS-process factory enabled at build time.
pub fn register_all(manager: &ProcessManager) {
    manager.register(SYSTEM_COMMAND, SystemProcess::factory());
    #[cfg(feature = "container")]
    manager.register(CONTAINER_COMMAND, ContainerProcess::factory());
}

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::{SYSTEM_COMMAND, SystemArgs, SystemProcess, register_all, register_extension};
}
