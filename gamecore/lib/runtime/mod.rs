//! Collaborators gamecore drives: the container runtime and the host it runs on.
//!
//! [`ContainerRuntime`] abstracts the container engine. [`DockerRuntime`] drives the docker CLI
//! and [`MemoryRuntime`] keeps everything in process for tests and dry runs. [`HostInfo`]
//! measures host capacity for memory admission.

mod host;
mod implementations;
mod traits;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use host::*;
pub use implementations::*;
pub use traits::*;
