//! Session Event Router (C5): bridges the durable per-session stream used
//! for replay with the pub/sub channel used for live fan-out, so a
//! reconnecting client catches up on structure while a live client also
//! sees token-level output.

mod router;

pub use router::{SessionRouter, SessionStreamItem, Subscription};
