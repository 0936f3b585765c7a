pub mod connection;
pub mod device;
pub mod session;

pub use connection::{ConnInfo, ConnectionRegistry};
pub use device::{DeviceIndex, DeviceSnapshot};
pub use session::SessionBinding;
