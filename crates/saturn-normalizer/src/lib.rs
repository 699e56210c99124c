//! Response Normalizer (C9): flattens a provider's raw JSON body into a
//! fixed per-capability shape, always keeping the untouched `raw` body
//! alongside it. Unknown capabilities fall back to `{data: raw, raw}`.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasonResponse {
    pub content: String,
    pub model: Option<String>,
    pub usage: Usage,
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub raw: Value,
}

fn normalize_reason(raw: &Value) -> Value {
    let content = raw
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .or_else(|| raw.get("content").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let model = raw
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_string);

    let usage_obj = raw.get("usage");
    let usage = Usage {
        input_tokens: usage_obj
            .and_then(|u| u.get("prompt_tokens").or_else(|| u.get("input_tokens")))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: usage_obj
            .and_then(|u| u.get("completion_tokens").or_else(|| u.get("output_tokens")))
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_tokens: usage_obj
            .and_then(|u| u.get("total_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };

    let normalized = ReasonResponse {
        content,
        model,
        usage,
        raw: raw.clone(),
    };
    serde_json::to_value(normalized).unwrap_or(Value::Null)
}

fn normalize_search(raw: &Value) -> Value {
    let results = raw
        .get("results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| SearchResultItem {
                    title: item
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    url: item
                        .get("url")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    snippet: item
                        .get("snippet")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let normalized = SearchResponse {
        results,
        raw: raw.clone(),
    };
    serde_json::to_value(normalized).unwrap_or(Value::Null)
}

/// `(capability, provider_slug, raw) -> normalized`. `provider_slug` is
/// accepted for parity with the per-provider shaping the original
/// contract allows but is not yet needed: every curated provider this
/// repo ships emits a close-enough-to-canonical shape that one normalizer
/// per capability covers all of them.
#[must_use]
pub fn normalize(capability: &str, _provider_slug: &str, raw: &Value) -> Value {
    match capability {
        "reason" => normalize_reason(raw),
        "search" => normalize_search(raw),
        _ => serde_json::json!({ "data": raw.clone(), "raw": raw.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize;
    use serde_json::json;

    #[test]
    fn reason_flattens_chat_completion_shape() {
        let raw = json!({
            "model": "gpt-4o-mini",
            "choices": [{ "message": { "content": "hello there" } }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 },
        });
        let normalized = normalize("reason", "openai", &raw);
        assert_eq!(normalized["content"], json!("hello there"));
        assert_eq!(normalized["model"], json!("gpt-4o-mini"));
        assert_eq!(normalized["usage"]["total_tokens"], json!(15));
        assert_eq!(normalized["raw"], raw);
    }

    #[test]
    fn search_flattens_result_list() {
        let raw = json!({
            "results": [{ "title": "Rust", "url": "https://rust-lang.org", "snippet": "..." }],
        });
        let normalized = normalize("search", "flat-search", &raw);
        assert_eq!(normalized["results"][0]["title"], json!("Rust"));
        assert_eq!(normalized["raw"], raw);
    }

    #[test]
    fn unknown_capability_falls_back_to_data_and_raw() {
        let raw = json!({ "anything": 1 });
        let normalized = normalize("speak", "tts-provider", &raw);
        assert_eq!(normalized["data"], raw);
        assert_eq!(normalized["raw"], raw);
    }
}
