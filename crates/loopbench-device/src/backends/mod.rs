//! Queue backend implementations
//!
//! One backend ships today: the software loopback device. Hardware
//! bindings implement [`crate::DeviceQueue`] out of tree.

mod software;

pub use software::SoftwareQueue;
