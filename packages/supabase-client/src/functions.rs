//! Edge-function invocation.

use serde::Serialize;

use crate::{check_status, Result, SupabaseClient};

impl SupabaseClient {
    /// Invoke the edge function `name` with a JSON body.
    ///
    /// Returns the response body as JSON, or as a JSON string when the
    /// function answered with plain text. There is no client-side timeout;
    /// callers that need one must impose it.
    pub async fn invoke<B: Serialize + ?Sized>(
        &self,
        name: &str,
        body: &B,
    ) -> Result<serde_json::Value> {
        let url = self.endpoint(&format!("functions/v1/{}", name))?;
        let start = std::time::Instant::now();

        let resp = self
            .authorize(self.http().post(url))
            .json(body)
            .send()
            .await?;
        let text = check_status(resp).await?.text().await?;

        tracing::debug!(
            function = name,
            duration_ms = start.elapsed().as_millis(),
            "Edge function returned"
        );

        Ok(parse_body(text))
    }
}

fn parse_body(text: String) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_variants() {
        assert_eq!(parse_body(String::new()), serde_json::Value::Null);
        assert_eq!(
            parse_body(r#"{"keywords":3}"#.to_string()),
            serde_json::json!({"keywords": 3})
        );
        assert_eq!(
            parse_body("ok".to_string()),
            serde_json::Value::String("ok".to_string())
        );
    }
}
