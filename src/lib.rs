//! streamhost - remote-play session supervisor
//!
//! Launches and supervises an external streaming client, decodes its
//! status output, credits playtime to the right catalog entry when the
//! remote device switches titles, reconnects on transient failures, and
//! keeps the client's window (or a browser surface) glued to a region of
//! the host UI.

pub mod attribution;
pub mod catalog;
pub mod config;
pub mod decoder;
pub mod embed;
pub mod events;
pub mod exit;
pub mod geometry;
pub mod launch;
pub mod presence;
pub mod process;
pub mod reconnect;
pub mod session;
pub mod supervisor;
pub mod surface;
pub mod tail;
pub mod timer;
