pub use super::addr::{LinkAddr, MacAddr, PacketType};
pub use super::geometry::RingGeometry;
pub use super::mapped::MmapCapture;
pub use super::recv::RecvCapture;
pub use super::socket::PacketSocket;
pub use super::{FrameStatus, PacketStatistics, RecvFlags};
pub use crate::capture::{Capture, CaptureConfig, CaptureMethod, Packet};
pub use crate::Interface;
