//! 基于 ash 的真实驱动

mod debug_messenger;
mod device;
mod instance;
mod platform;

pub use debug_messenger::DebugMsger;
pub use device::AshDevice;
pub use instance::AshInstance;
pub use platform::AshPlatform;
