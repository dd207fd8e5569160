//! porter-hw: hardware abstraction for frame intake and the door relay.
//!
//! Frames come from the external recorder as encoded stills; the door is
//! a single relay line behind the [`Actuator`] trait.

pub mod frame;
pub mod relay;

pub use frame::{decode_still, encode_jpeg, Frame, FrameError, FrameSource, SnapshotSource};
pub use relay::{Actuator, GpioRelay, RelayError, SimulatedRelay};
