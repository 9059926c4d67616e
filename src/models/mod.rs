//! Response envelope shapes shared by every HTTP handler in `routes`.
//! The JSON envelope (`data`/`meta`/`error`/`message`) is an ambient
//! concern common to every endpoint, kept identical across handlers.

pub mod responses;
