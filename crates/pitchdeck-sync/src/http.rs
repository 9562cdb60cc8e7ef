use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use pitchdeck_types::api::{
    CounterParams, LikedPitchRow, NewComment, NewDirectMessage, NewLike, NewPitch, ReadFlagPatch,
};
use pitchdeck_types::events::Table;
use pitchdeck_types::models::{Comment, DirectMessage, LikeEdge, Pitch, Profile};

use crate::error::{Result, SyncError};
use crate::pitches::PitchDraft;
use crate::remote::{Adjustment, Counter, EdgeWrite, RemoteStore, counter_procedure};

const RETURN_ROWS: (&str, &str) = ("Prefer", "return=representation");
const RETURN_NOTHING: (&str, &str) = ("Prefer", "return=minimal");

/// [`RemoteStore`] over the backend's REST interface (`/rest/v1/<table>` rows,
/// `/rest/v1/rpc/<procedure>` calls, PostgREST-style filters).
pub struct HttpStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
        }
    }

    /// Act as a signed-in user instead of the anonymous key.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.as_str())
    }

    fn rpc_url(&self, procedure: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, procedure)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = check(request.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Runs a write that returns the affected rows and hands back the first one.
    async fn fetch_one<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let mut rows: Vec<T> = self.fetch(request.header(RETURN_ROWS.0, RETURN_ROWS.1)).await?;
        if rows.is_empty() {
            return Err(SyncError::Remote {
                status: StatusCode::OK.as_u16(),
                message: "write returned no rows".into(),
            });
        }
        Ok(rows.swap_remove(0))
    }

    /// Runs a write and counts the rows it touched.
    async fn count_rows(&self, request: RequestBuilder) -> Result<usize> {
        let rows: Vec<serde_json::Value> =
            self.fetch(request.header(RETURN_ROWS.0, RETURN_ROWS.1)).await?;
        Ok(rows.len())
    }
}

/// Map non-success statuses onto [`SyncError`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    debug!("Remote store returned {}: {}", status, message);
    match status {
        StatusCode::CONFLICT => Err(SyncError::Conflict),
        StatusCode::NOT_FOUND => Err(SyncError::NotFound),
        _ => Err(SyncError::Remote {
            status: status.as_u16(),
            message,
        }),
    }
}

fn eq(id: Uuid) -> String {
    format!("eq.{}", id)
}

/// `in.(a,b,c)` filter for a batched lookup.
fn in_list(ids: &[Uuid]) -> String {
    let joined: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    format!("in.({})", joined.join(","))
}

/// Matches messages from `a` to `b` or from `b` to `a`.
fn conversation_filter(a: Uuid, b: Uuid) -> String {
    format!(
        "(and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a}))"
    )
}

#[async_trait]
impl RemoteStore for HttpStore {
    async fn list_pitches(&self) -> Result<Vec<Pitch>> {
        let request = self
            .request(Method::GET, self.table_url(Table::Pitches))
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        self.fetch(request).await
    }

    async fn insert_pitch(&self, user_id: Uuid, draft: &PitchDraft) -> Result<Pitch> {
        let body = NewPitch {
            user_id,
            title: draft.title.trim(),
            description: draft.description.trim(),
            tags: &draft.tags,
        };
        let request = self
            .request(Method::POST, self.table_url(Table::Pitches))
            .json(&body);
        self.fetch_one(request).await
    }

    async fn liked_pitch_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let request = self
            .request(Method::GET, self.table_url(Table::PitchLikes))
            .query(&[("select", "pitch_id".to_string()), ("user_id", eq(user_id))]);
        let rows: Vec<LikedPitchRow> = self.fetch(request).await?;
        Ok(rows.into_iter().map(|row| row.pitch_id).collect())
    }

    async fn insert_like(&self, edge: LikeEdge) -> Result<EdgeWrite> {
        let body = NewLike {
            pitch_id: edge.pitch_id,
            user_id: edge.user_id,
        };
        let request = self
            .request(Method::POST, self.table_url(Table::PitchLikes))
            .header(RETURN_NOTHING.0, RETURN_NOTHING.1)
            .json(&body);

        match check(request.send().await?).await {
            Ok(_) => Ok(EdgeWrite::Created),
            Err(SyncError::Conflict) => Ok(EdgeWrite::AlreadyPresent),
            Err(e) => Err(e),
        }
    }

    async fn delete_like(&self, edge: LikeEdge) -> Result<EdgeWrite> {
        let request = self
            .request(Method::DELETE, self.table_url(Table::PitchLikes))
            .query(&[("pitch_id", eq(edge.pitch_id)), ("user_id", eq(edge.user_id))]);

        match self.count_rows(request).await? {
            0 => Ok(EdgeWrite::Absent),
            _ => Ok(EdgeWrite::Removed),
        }
    }

    async fn adjust_counter(
        &self,
        pitch_id: Uuid,
        counter: Counter,
        adjustment: Adjustment,
    ) -> Result<()> {
        let procedure = counter_procedure(counter, adjustment);
        let request = self
            .request(Method::POST, self.rpc_url(procedure))
            .json(&CounterParams {
                pitch_id_param: pitch_id,
            });
        check(request.send().await?).await?;
        Ok(())
    }

    async fn list_comments(&self, pitch_id: Uuid) -> Result<Vec<Comment>> {
        let request = self
            .request(Method::GET, self.table_url(Table::Comments))
            .query(&[
                ("select", "id,pitch_id,user_id,content,created_at".to_string()),
                ("pitch_id", eq(pitch_id)),
                ("order", "created_at.asc".to_string()),
            ]);
        self.fetch(request).await
    }

    async fn insert_comment(
        &self,
        pitch_id: Uuid,
        user_id: Uuid,
        content: &str,
    ) -> Result<Comment> {
        let request = self
            .request(Method::POST, self.table_url(Table::Comments))
            .json(&NewComment {
                pitch_id,
                user_id,
                content,
            });
        self.fetch_one(request).await
    }

    async fn delete_comment(&self, comment_id: Uuid, user_id: Uuid) -> Result<bool> {
        let request = self
            .request(Method::DELETE, self.table_url(Table::Comments))
            .query(&[("id", eq(comment_id)), ("user_id", eq(user_id))]);
        Ok(self.count_rows(request).await? > 0)
    }

    async fn profiles_by_ids(&self, user_ids: &[Uuid]) -> Result<Vec<Profile>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        let request = self
            .request(Method::GET, self.table_url(Table::Profiles))
            .query(&[
                ("select", "user_id,full_name,startup_name".to_string()),
                ("user_id", in_list(user_ids)),
            ]);
        self.fetch(request).await
    }

    async fn list_conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<DirectMessage>> {
        let request = self
            .request(Method::GET, self.table_url(Table::DirectMessages))
            .query(&[
                ("select", "*".to_string()),
                ("or", conversation_filter(a, b)),
                ("order", "created_at.asc".to_string()),
            ]);
        self.fetch(request).await
    }

    async fn insert_direct_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<DirectMessage> {
        let request = self
            .request(Method::POST, self.table_url(Table::DirectMessages))
            .json(&NewDirectMessage {
                sender_id,
                receiver_id,
                content,
            });
        self.fetch_one(request).await
    }

    async fn mark_conversation_read(&self, reader: Uuid, peer: Uuid) -> Result<u64> {
        let request = self
            .request(Method::PATCH, self.table_url(Table::DirectMessages))
            .query(&[
                ("receiver_id", eq(reader)),
                ("sender_id", eq(peer)),
                ("read", "eq.false".to_string()),
            ])
            .json(&ReadFlagPatch { read: true });

        let changed = self.count_rows(request).await.inspect_err(|e| {
            warn!("Failed to mark conversation with {} read: {}", peer, e);
        })?;
        Ok(changed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_normalized() {
        let store = HttpStore::new("https://api.example.com/", "anon");
        assert_eq!(
            store.table_url(Table::PitchLikes),
            "https://api.example.com/rest/v1/pitch_likes"
        );
        assert_eq!(
            store.rpc_url("increment_likes"),
            "https://api.example.com/rest/v1/rpc/increment_likes"
        );
    }

    #[test]
    fn batched_profile_filter() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(in_list(&[a, b]), format!("in.({},{})", a, b));
    }

    #[test]
    fn conversation_filter_covers_both_directions() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let filter = conversation_filter(a, b);
        assert!(filter.contains(&format!("and(sender_id.eq.{a},receiver_id.eq.{b})")));
        assert!(filter.contains(&format!("and(sender_id.eq.{b},receiver_id.eq.{a})")));
    }
}
