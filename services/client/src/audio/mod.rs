//! Audio Transport Adapter: device access and the playback queue behind it.

pub mod device;
pub mod playback;

pub use device::CpalAudioTransport;
