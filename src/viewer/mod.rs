mod protocol;
mod server;
mod session;

pub use protocol::{
    read_message, write_message, Encoding, Frame, FrameHeader, Header, Metadata, PlotHandle, MAX_BODY_LEN,
    MAX_HEADER_LEN, PROTOCOL_VERSION,
};
pub use server::{FrameStore, StoredFrame, ViewerServer};
pub use session::{ChannelStatus, Session};

/// Printed by the viewer binary once it accepts connections.
pub const READY_BANNER: &str = "--- tunnelvision ---";
