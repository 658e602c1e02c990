//! Webhook Router (C6): turns signed external events into agent
//! assignment triggers and autonomous loop-closure (a merged PR
//! auto-completes its linked task without an agent needing to be
//! online).

mod ingest;
mod ratelimit;
mod routing;
mod verify;

pub use ingest::{IngestOutcome, WebhookIngest};
pub use ratelimit::SlidingWindowLimiter;
pub use routing::WebhookRouter;
pub use verify::verify_signature;
