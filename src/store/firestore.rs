use std::time::Duration;

use anyhow::anyhow;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::{AppResult, GetField};

use super::{Message, MessageStore, NewMessage, Snapshot, Subscription, Timestamp};

/// Cloud Firestore over its REST API. Appends go through `documents:commit`
/// with a server timestamp transform; subscriptions poll `runQuery` and emit
/// whenever the result differs from the last one sent.
#[derive(Clone)]
pub struct FirestoreStore {
    http_client: reqwest::Client,
    endpoint: String,
    database: String,
    api_key: String,
    poll_interval: Duration,
}

#[derive(Deserialize)]
struct QueryRow {
    document: Option<Document>,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    fields: Value,
}

impl FirestoreStore {
    pub fn new(endpoint: &str, project_id: &str, api_key: &str, poll_interval: Duration) -> FirestoreStore {
        FirestoreStore {
            http_client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            database: format!("projects/{project_id}/databases/(default)"),
            api_key: api_key.to_owned(),
            poll_interval,
        }
    }

    fn room_path(&self, room: &str) -> String {
        format!("{}/documents/chats/{room}", self.database)
    }

    /// `runQuery` under the room document. Room ids are free-form, so they go
    /// in as an encoded path segment.
    fn query_url(&self, room: &str) -> AppResult<Url> {
        let mut url = Url::parse(&format!("{}/{}/documents", self.endpoint, self.database))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("firestore endpoint {} cannot hold a path", self.endpoint))?
            .push("chats")
            .push(&format!("{room}:runQuery"));
        Ok(url)
    }

    async fn query(&self, room: &str) -> AppResult<Snapshot> {
        let rows: Vec<QueryRow> = self
            .http_client
            .post(self.query_url(room)?)
            .query(&[("key", &self.api_key)])
            .json(&json!({
                "structuredQuery": {
                    "from": [{ "collectionId": "messages" }],
                    "orderBy": [{ "field": { "fieldPath": "timestamp" }, "direction": "ASCENDING" }],
                }
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        rows.into_iter()
            .filter_map(|row| row.document)
            .map(|document| decode_message(&document.fields))
            .collect()
    }
}

fn decode_message(fields: &Value) -> AppResult<Message> {
    let timestamp = fields.get_obj_field("timestamp")?.get_str_field("timestampValue")?;
    let timestamp = OffsetDateTime::parse(&timestamp, &Rfc3339)
        .map_err(|err| anyhow!("bad timestampValue {timestamp:?}: {err}"))?;

    Ok(Message {
        text: fields.get_obj_field("text")?.get_str_field("stringValue")?,
        sender_id: fields.get_obj_field("senderId")?.get_str_field("stringValue")?,
        timestamp: Timestamp::from_datetime(timestamp),
    })
}

impl MessageStore for FirestoreStore {
    async fn append(&self, room: &str, NewMessage { text, sender_id }: NewMessage) -> AppResult<()> {
        let name = format!("{}/messages/{}", self.room_path(room), Uuid::now_v7().simple());

        self.http_client
            .post(format!("{}/{}/documents:commit", self.endpoint, self.database))
            .query(&[("key", &self.api_key)])
            .json(&json!({
                "writes": [{
                    "update": {
                        "name": name,
                        "fields": {
                            "text": { "stringValue": text },
                            "senderId": { "stringValue": sender_id },
                        },
                    },
                    "updateTransforms": [
                        { "fieldPath": "timestamp", "setToServerValue": "REQUEST_TIME" }
                    ],
                    "currentDocument": { "exists": false },
                }]
            }))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn subscribe(&self, room: &str) -> AppResult<Subscription> {
        let store = self.clone();
        let room_id = room.to_owned();

        Ok(Subscription::spawn(room, move |tx| async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<Snapshot> = None;

            loop {
                ticker.tick().await;
                match store.query(&room_id).await {
                    Ok(snapshot) if last.as_ref() != Some(&snapshot) => {
                        if tx.send(snapshot.clone()).await.is_err() {
                            break;
                        }
                        last = Some(snapshot);
                    }
                    Ok(_) => {}
                    Err(err) => warn!(room = %room_id, "firestore query failed: {:#}", err.0),
                }
            }
        }))
    }
}
