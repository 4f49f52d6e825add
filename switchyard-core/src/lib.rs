//! Switchyard Core
//!
//! This crate contains the runtime-agnostic transport building blocks used by
//! the broker and its clients:
//! - Multipart message builder (`message`)
//! - Wire frame codec with fragmentation handling (`frame`)
//! - TCP router/dealer sockets with identity envelopes (`tcp`)
//! - Peer map shared by the socket hubs (`hub`)
//! - In-process transport for same-process workers (`inproc`)
//! - Cooperative shutdown token (`shutdown`)
//! - Error types (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]

pub mod error;
pub mod frame;
pub mod hub;
pub mod inproc;
pub mod message;
pub mod shutdown;
pub mod tcp;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::error::{Result, TransportError};
    pub use crate::frame::{Frame, FrameDecoder, MultipartAssembler};
    pub use crate::hub::{PeerEvent, PeerMap};
    pub use crate::inproc::{InprocDealer, InprocRouter};
    pub use crate::message::Message;
    pub use crate::shutdown::{ShutdownController, ShutdownToken};
    pub use crate::tcp::{TcpDealer, TcpRouter};
}
