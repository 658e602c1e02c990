//! Inter-Agent Inbox (C7): durable ordered message streams with
//! last-read cursors, one stream per recipient agent. Ordering is by
//! stream-id only — no timestamp-based sort, so clock skew between
//! producers is irrelevant.

mod router;

pub use router::{InboxList, InboxRouter};
