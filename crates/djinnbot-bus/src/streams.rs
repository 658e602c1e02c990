use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, FromRedisValue, Value};
use std::collections::HashMap;

use crate::{Bus, BusResult};

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl Bus {
    /// Appends one entry with an auto-assigned, monotone id. `maxlen`, if
    /// given, caps the stream with an approximate trim-at-append strategy
    /// (`sessions:{id}:stream` uses this to bound replay history).
    pub async fn xadd(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
        maxlen: Option<u64>,
    ) -> BusResult<String> {
        let mut conn = self.conn();
        let id: String = if let Some(maxlen) = maxlen {
            conn.xadd_maxlen(stream, StreamMaxlen::Approx(maxlen as usize), "*", fields)
                .await?
        } else {
            conn.xadd(stream, "*", fields).await?
        };
        Ok(id)
    }

    pub async fn xrange(&self, stream: &str, lo: &str, hi: &str) -> BusResult<Vec<StreamEntry>> {
        let mut conn = self.conn();
        let reply: redis::streams::StreamRangeReply = conn.xrange(stream, lo, hi).await?;
        Ok(reply.ids.into_iter().map(stream_id_to_entry).collect())
    }

    /// The range variant used by replay: everything strictly after
    /// `after_id`, open-ended.
    pub async fn xrange_after(&self, stream: &str, after_id: &str) -> BusResult<Vec<StreamEntry>> {
        let exclusive_lo = format!("({after_id}");
        self.xrange(stream, &exclusive_lo, "+").await
    }

    /// Blocks up to `block_ms` waiting for new entries after `after_id`.
    /// Returns an empty vec on timeout rather than an error — callers use
    /// the empty result as their heartbeat-emission cue.
    pub async fn xread_blocking(
        &self,
        stream: &str,
        after_id: &str,
        count: usize,
        block_ms: usize,
    ) -> BusResult<Vec<StreamEntry>> {
        let mut conn = self.conn();
        let opts = StreamReadOptions::default().count(count).block(block_ms);
        let reply: StreamReadReply = conn.xread_options(&[stream], &[after_id], &opts).await?;
        let mut out = Vec::new();
        for key in reply.keys {
            out.extend(key.ids.into_iter().map(stream_id_to_entry));
        }
        Ok(out)
    }
}

fn stream_id_to_entry(id: redis::streams::StreamId) -> StreamEntry {
    let mut fields = HashMap::new();
    for (field, value) in id.map {
        let text = String::from_redis_value(&value).unwrap_or_else(|_| match value {
            Value::Nil => String::new(),
            other => format!("{other:?}"),
        });
        fields.insert(field, text);
    }
    StreamEntry { id: id.id, fields }
}
