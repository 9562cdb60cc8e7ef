use std::env;
use std::time::Duration;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub user_id: Option<Uuid>,
    pub chat_url: String,
    pub realtime_url: String,
    pub refresh_debounce: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let api_url = env::var("PITCHDECK_API_URL")
            .unwrap_or_else(|_| "http://localhost:54321".to_string())
            .trim_end_matches('/')
            .to_string();
        let chat_url = env::var("PITCHDECK_CHAT_URL")
            .unwrap_or_else(|_| format!("{}/functions/v1/chat", api_url));
        let realtime_url =
            env::var("PITCHDECK_REALTIME_URL").unwrap_or_else(|_| realtime_url_for(&api_url));
        let refresh_debounce = env::var("PITCHDECK_REFRESH_DEBOUNCE_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(250));

        Self {
            api_key: env::var("PITCHDECK_API_KEY").unwrap_or_default(),
            access_token: env::var("PITCHDECK_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            user_id: env::var("PITCHDECK_USER_ID")
                .ok()
                .and_then(|id| Uuid::parse_str(id.trim()).ok()),
            api_url,
            chat_url,
            realtime_url,
            refresh_debounce,
        }
    }
}

/// Websocket endpoint next to a REST base URL.
fn realtime_url_for(api_url: &str) -> String {
    let socket_base = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_url.to_string()
    };
    format!("{}/realtime/v1", socket_base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_url_follows_api_scheme() {
        assert_eq!(
            realtime_url_for("https://demo.example.co"),
            "wss://demo.example.co/realtime/v1"
        );
        assert_eq!(
            realtime_url_for("http://localhost:54321"),
            "ws://localhost:54321/realtime/v1"
        );
    }
}
