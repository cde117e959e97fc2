//! Recording devices: identity, the gateway seam and its HTTP and mock implementations.

pub mod gateway;
pub mod http;
pub mod mock;
pub mod model;

pub use gateway::{ActiveStream, DeleteOutcome, DeviceGateway, RawRecording, StreamActivity};
pub use model::{Device, ModelFamily, StorageStats};
