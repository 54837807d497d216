use reqwest::Client;
use uuid::Uuid;

use gather_types::api::{
    DirectConversationEntry, RoomOverview, SendMessageRequest, ToggleReactionRequest,
    ToggleReactionResponse,
};
use gather_types::models::{ChatMessage, ConversationKind};

use crate::ClientError;
use crate::history::PageRequest;

/// Thin wrapper over the REST collaborators: snapshot fetches, paginated
/// history, and the fallback mutation paths used when the gateway channel
/// is down. All list endpoints return newest-first; the history store
/// reverses for display.
pub struct RestClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Fetch the page described by a history store request.
    pub async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<ChatMessage>, ClientError> {
        match request.conversation.kind {
            ConversationKind::Room => {
                self.room_messages(request.conversation.id, request.skip, request.take)
                    .await
            }
            ConversationKind::Direct => {
                self.direct_messages(request.conversation.id, request.skip, request.take)
                    .await
            }
        }
    }

    pub async fn room_messages(
        &self,
        room_id: Uuid,
        skip: u32,
        take: u32,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let res = self
            .http
            .get(format!("{}/rooms/{}/messages", self.base_url, room_id))
            .query(&[("skip", skip), ("take", take)])
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    pub async fn direct_messages(
        &self,
        peer_id: Uuid,
        skip: u32,
        take: u32,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let res = self
            .http
            .get(format!("{}/direct/{}/messages", self.base_url, peer_id))
            .query(&[("skip", skip), ("take", take)])
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    pub async fn direct_conversations(&self) -> Result<Vec<DirectConversationEntry>, ClientError> {
        let res = self
            .http
            .get(format!("{}/direct/conversations", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    pub async fn my_rooms(&self) -> Result<Vec<RoomOverview>, ClientError> {
        let res = self
            .http
            .get(format!("{}/me/rooms", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    /// Fallback send when the gateway channel is unavailable. The created
    /// message still fans out to gateway-connected participants server-side.
    pub async fn send_message(
        &self,
        conversation_kind: ConversationKind,
        conversation_id: Uuid,
        content: &str,
        temp_id: Option<Uuid>,
    ) -> Result<ChatMessage, ClientError> {
        let path = match conversation_kind {
            ConversationKind::Room => format!("{}/rooms/{}/messages", self.base_url, conversation_id),
            ConversationKind::Direct => {
                format!("{}/direct/{}/messages", self.base_url, conversation_id)
            }
        };
        let res = self
            .http
            .post(path)
            .bearer_auth(&self.token)
            .json(&SendMessageRequest {
                content: content.to_string(),
                temp_id,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(res.json().await?)
    }

    pub async fn toggle_reaction(
        &self,
        kind: ConversationKind,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<bool, ClientError> {
        let res = self
            .http
            .post(format!(
                "{}/messages/{}/{}/reactions",
                self.base_url,
                kind.as_str(),
                message_id
            ))
            .bearer_auth(&self.token)
            .json(&ToggleReactionRequest {
                emoji: emoji.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        let body: ToggleReactionResponse = res.json().await?;
        Ok(body.added)
    }

    pub async fn delete_message(
        &self,
        kind: ConversationKind,
        message_id: Uuid,
    ) -> Result<(), ClientError> {
        self.http
            .delete(format!(
                "{}/messages/{}/{}",
                self.base_url,
                kind.as_str(),
                message_id
            ))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
