#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

//! busfire — forward execution results onto the minion daemon's event bus.
//!
//! After a remote execution finishes, the return record is stamped with a
//! filterable tag, wrapped in an envelope, and fired under the `fire_master`
//! routing label. The minion daemon forwards the envelope to the master's
//! event bus, where third-party consumers filter on the tag.
//!
//! The bus itself belongs to the host daemon and is consumed through the
//! [`EventPublisher`] seam; this crate never opens a socket.

pub mod config;
pub mod events;
pub mod returner;

pub use config::Config;
pub use events::{Envelope, EventPublisher, FIRE_MASTER, THIRD_PARTY_TAG};
pub use returner::{returner, returner_batch, returner_with_config};
