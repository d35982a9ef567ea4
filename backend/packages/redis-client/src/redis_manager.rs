use std::collections::HashMap;

use fred::prelude::*;
use fred::types::RedisValue;
use log::{error, info};

/// One entry read from a Redis stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Clone)]
pub struct RedisManager {
    client: RedisClient,
}

impl RedisManager {
    pub fn new(redis_url: &str) -> Result<Self, RedisError> {
        let config = RedisConfig::from_url(redis_url)?;
        let client = RedisClient::new(config, None, None, None);
        Ok(Self { client })
    }

    pub async fn connect(&self) -> Result<(), RedisError> {
        self.client.connect();
        self.client.wait_for_connect().await?;
        info!("Connected to Redis");
        Ok(())
    }

    pub async fn quit(&self) -> Result<(), RedisError> {
        self.client.quit().await
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), RedisError> {
        self.client.publish::<(), _, _>(channel, payload).await
    }

    pub async fn stream_add(&self, stream: &str, pairs: &[(&str, &str)]) -> Result<(), RedisError> {
        let fields: Vec<(String, String)> = pairs
            .iter()
            .map(|(field, value)| ((*field).to_owned(), (*value).to_owned()))
            .collect();

        self.client
            .xadd::<(), _, _, _, _>(stream, false, None, "*", fields)
            .await
    }

    /// Reads up to `count` entries newer than `last_id` and advances it.
    pub async fn read_stream(
        &self,
        stream: &str,
        last_id: &mut String,
        count: u64,
    ) -> Result<Vec<StreamEntry>, RedisError> {
        let streams = vec![stream];
        let ids = vec![last_id.as_str()];

        let raw: RedisValue = match self
            .client
            .xread::<RedisValue, _, _>(Some(count), None, streams, ids)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!("XREAD error on {}: {}", stream, e);
                return Err(e);
            }
        };

        let entries = parse_xread(raw);
        // XREAD replies in id order.
        if let Some(newest) = entries.last() {
            *last_id = newest.id.clone();
        }
        Ok(entries)
    }
}

fn value_to_string(value: &RedisValue) -> String {
    value.as_str().map(|s| s.to_string()).unwrap_or_default()
}

/// Flattens an XREAD reply (`[[stream, [[id, [k, v, ...]], ...]], ...]`).
fn parse_xread(raw: RedisValue) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    let RedisValue::Array(streams) = raw else {
        return entries;
    };

    for stream in streams {
        let RedisValue::Array(stream_data) = stream else {
            continue;
        };
        let Some(RedisValue::Array(messages)) = stream_data.get(1) else {
            continue;
        };
        for message in messages {
            let RedisValue::Array(msg_data) = message else {
                continue;
            };
            if msg_data.len() < 2 {
                continue;
            }
            let id = value_to_string(&msg_data[0]);
            if id.is_empty() {
                continue;
            }
            let RedisValue::Array(fields_array) = &msg_data[1] else {
                continue;
            };
            let fields = fields_array
                .chunks_exact(2)
                .map(|pair| (value_to_string(&pair[0]), value_to_string(&pair[1])))
                .collect();
            entries.push(StreamEntry { id, fields });
        }
    }

    entries
}
