//! Media engine adapters

pub mod loopback;
#[cfg(feature = "native-rtc")]
pub mod native;

pub use loopback::{LinkProfile, LoopbackMediaEngine, LoopbackPeerConnection, LoopbackTrack};
#[cfg(feature = "native-rtc")]
pub use native::{NativeMediaEngine, NativePeerConnection};
