use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::Store;
use crate::error::StoreError;
use crate::ir::{HistoryEntry, StoredItem};

const ITEM_PREFIX: &str = "wpt:item:";
const HISTORY_KEY: &str = "wpt:history";

#[derive(Clone, Debug)]
pub struct RestKvConfig {
    pub url: String,
    pub token: String,
    pub timeout_secs: u64,
}

/// Redis-over-HTTP store (Upstash REST protocol): commands are JSON arrays posted with a
/// bearer token. Items are plain string values; recency lives in a sorted set scored by
/// creation time.
pub struct RestKvStore {
    url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl RestKvStore {
    pub fn new(cfg: RestKvConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token,
            client,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.url, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StoreError::Remote(format!("{status}: {text}")));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| StoreError::Remote(e.to_string()))
    }

    async fn command(&self, args: Value) -> Result<Value, StoreError> {
        let raw = self.post("", &args).await?;
        reply_result(raw)
    }

    /// Runs all commands in one MULTI/EXEC transaction.
    async fn transaction(&self, commands: Value) -> Result<Vec<Value>, StoreError> {
        let raw = self.post("/multi-exec", &commands).await?;
        let replies: Vec<Value> =
            serde_json::from_value(raw).map_err(|e| StoreError::Remote(e.to_string()))?;
        replies.into_iter().map(reply_result).collect()
    }
}

fn reply_result(raw: Value) -> Result<Value, StoreError> {
    let reply: CommandReply =
        serde_json::from_value(raw).map_err(|e| StoreError::Remote(e.to_string()))?;
    match reply.error {
        Some(err) => Err(StoreError::Remote(err)),
        None => Ok(reply.result),
    }
}

fn item_key(key: &str) -> String {
    format!("{ITEM_PREFIX}{key}")
}

#[async_trait]
impl Store for RestKvStore {
    fn backend_name(&self) -> &'static str {
        "rest"
    }

    async fn save(&self, item: &StoredItem) -> Result<(), StoreError> {
        let doc = serde_json::to_string(item)?;
        let score = item.created_at.timestamp_millis().to_string();
        self.transaction(json!([
            ["SET", item_key(&item.key), doc],
            ["ZADD", HISTORY_KEY, score, item.key],
        ]))
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredItem>, StoreError> {
        match self.command(json!(["GET", item_key(key)])).await? {
            Value::String(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            _ => Ok(None),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let stop = (limit * 2).saturating_sub(1).to_string();
        let keys = self
            .command(json!(["ZREVRANGE", HISTORY_KEY, "0", stop]))
            .await?;
        let keys: Vec<String> = serde_json::from_value(keys)
            .map_err(|e| StoreError::Remote(format!("unexpected ZREVRANGE reply: {e}")))?;
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let mut mget = vec![Value::String("MGET".into())];
        mget.extend(keys.iter().map(|k| Value::String(item_key(k))));
        let docs = self.command(Value::Array(mget)).await?;
        let docs: Vec<Option<String>> = serde_json::from_value(docs)
            .map_err(|e| StoreError::Remote(format!("unexpected MGET reply: {e}")))?;

        let mut out = Vec::new();
        for doc in docs.into_iter().flatten() {
            if out.len() >= limit {
                break;
            }
            match serde_json::from_str::<StoredItem>(&doc) {
                Ok(item) => out.push(item.summary()),
                Err(err) => tracing::warn!(%err, "skipping unreadable stored item"),
            }
        }
        Ok(out)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let replies = self
            .transaction(json!([["DEL", item_key(key)], ["ZREM", HISTORY_KEY, key]]))
            .await?;
        let deleted = replies.first().and_then(Value::as_i64).unwrap_or(0);
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;
    use crate::store::testing::item;

    fn store_at(url: String) -> RestKvStore {
        RestKvStore::new(RestKvConfig {
            url,
            token: "t0k".into(),
            timeout_secs: 5,
        })
        .expect("client")
    }

    #[test]
    fn reply_error_is_surfaced() {
        let err = reply_result(json!({"error": "WRONGTYPE"})).unwrap_err();
        assert!(err.to_string().contains("WRONGTYPE"));
        assert_eq!(reply_result(json!({"result": 1})).expect("ok"), json!(1));
    }

    #[test]
    fn items_are_namespaced() {
        assert_eq!(item_key("abc"), "wpt:item:abc");
    }

    #[tokio::test]
    async fn save_sets_item_and_scores_history_in_one_transaction() {
        let mut server = Server::new_async().await;
        let it = item("abc", 0);
        let doc = serde_json::to_string(&it).expect("doc");
        let score = it.created_at.timestamp_millis().to_string();
        let m = server
            .mock("POST", "/multi-exec")
            .match_header("authorization", "Bearer t0k")
            .match_body(Matcher::Json(json!([
                ["SET", "wpt:item:abc", doc],
                ["ZADD", "wpt:history", score, "abc"],
            ])))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"result":"OK"},{"result":1}]"#)
            .create_async()
            .await;

        store_at(server.url()).save(&it).await.expect("save");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn history_reads_keys_then_documents() {
        let mut server = Server::new_async().await;
        let a = serde_json::to_string(&item("a", 0)).expect("doc");
        let b = serde_json::to_string(&item("b", 1)).expect("doc");
        server
            .mock("POST", "/")
            .match_body(Matcher::Json(json!(["ZREVRANGE", "wpt:history", "0", "5"])))
            .with_status(200)
            .with_body(r#"{"result":["b","gone","a"]}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::Json(json!([
                "MGET",
                "wpt:item:b",
                "wpt:item:gone",
                "wpt:item:a"
            ])))
            .with_status(200)
            .with_body(json!({"result": [b, null, a]}).to_string())
            .create_async()
            .await;

        let hist = store_at(server.url()).list_recent(3).await.expect("list");
        let keys: Vec<&str> = hist.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(hist[0].title, "title b");
    }

    #[tokio::test]
    async fn malformed_history_reply_is_an_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"result":"not a list"}"#)
            .create_async()
            .await;
        let err = store_at(server.url()).list_recent(10).await.unwrap_err();
        assert!(matches!(err, StoreError::Remote(ref m) if m.contains("ZREVRANGE")), "{err}");
    }

    #[tokio::test]
    async fn remove_reports_whether_the_item_existed() {
        let mut server = Server::new_async().await;
        let body = Matcher::Json(json!([["DEL", "wpt:item:abc"], ["ZREM", "wpt:history", "abc"]]));
        let hit = server
            .mock("POST", "/multi-exec")
            .match_body(body.clone())
            .with_status(200)
            .with_body(r#"[{"result":1},{"result":1}]"#)
            .expect(1)
            .create_async()
            .await;
        let store = store_at(server.url());
        assert!(store.remove("abc").await.expect("remove"));
        hit.assert_async().await;
        hit.remove_async().await;

        server
            .mock("POST", "/multi-exec")
            .match_body(body)
            .with_status(200)
            .with_body(r#"[{"result":0},{"result":0}]"#)
            .create_async()
            .await;
        assert!(!store.remove("abc").await.expect("remove"));
    }

    #[tokio::test]
    async fn http_failures_become_remote_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;
        let err = store_at(server.url()).get("abc").await.unwrap_err();
        assert!(err.to_string().contains("unauthorized"), "{err}");
    }
}
