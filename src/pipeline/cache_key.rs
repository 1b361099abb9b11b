use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ir::TranslationRequest;

/// Request fields that only steer lookup and never change the result.
const LOOKUP_ONLY_FIELDS: &[&str] = &["useCache"];

/// Canonical JSON of the request: sorted keys, lookup flags dropped, active model ids added.
pub fn canonical_request(req: &TranslationRequest, model_translate: &str, model_qa: &str) -> String {
    let mut map: BTreeMap<String, Value> = match serde_json::to_value(req) {
        Ok(Value::Object(obj)) => obj.into_iter().collect(),
        _ => BTreeMap::new(),
    };
    for f in LOOKUP_ONLY_FIELDS {
        map.remove(*f);
    }
    map.insert("modelTranslate".into(), Value::String(model_translate.to_string()));
    map.insert("modelQa".into(), Value::String(model_qa.to_string()));
    serde_json::to_string(&map).unwrap_or_default()
}

/// Lowercase hex SHA-256 of [`canonical_request`].
pub fn cache_key(req: &TranslationRequest, model_translate: &str, model_qa: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_request(req, model_translate, model_qa).as_bytes());
    hex::encode(hasher.finalize())
}
