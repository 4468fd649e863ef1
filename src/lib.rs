//! Wire codec, chunking engine, and transfer state machines for
//! peer-to-peer file transfer over a low-bandwidth mesh. This crate owns
//! the protocol and the per-transfer logic only; it is wired up to an
//! actual mesh, filesystem, and UI by collaborator code through the small
//! trait surface in [`traits`].
//!
//! The four pieces, in dependency order:
//! - [`codec`] — bit-exact encode/decode for the envelope and the
//!   MANIFEST/CHUNK/ACK control messages.
//! - [`chunk_engine`] — adaptive chunk sizing, compression, the shared LRU
//!   cache, and batch-parallel chunk production.
//! - [`transfer`] — the sender and receiver state machines built on top of
//!   the codec and chunk engine.
//! - [`manager`] — queue admission, scheduling, and the envelope demux
//!   that ties every active transfer together.

pub mod chunk_engine;
pub mod codec;
pub mod constants;
pub mod error;
pub mod logging;
pub mod manager;
pub mod peer;
pub mod traits;
pub mod transfer;

pub use codec::{Ack, Chunk, Envelope, Manifest, MessageType};
pub use error::{AdmissionError, DecodeError, TransferFailure};
pub use manager::{ManagerConfig, ManagerEvent, TransferManager};
pub use peer::{PeerId, Token};
pub use transfer::{Direction, TransferSnapshot, TransferStatus};
