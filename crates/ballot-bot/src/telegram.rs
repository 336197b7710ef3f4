//! Telegram Bot API: update parsing, routing into engine events, and
//! outbound message rendering.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ballot::{ElectionConfig, InboundEvent, Reply, VoterId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const API_BASE: &str = "https://api.telegram.org";

pub const UNKNOWN_ACTION: &str = "Unknown action";

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub from: Option<User>,
    pub text: Option<String>,
    pub contact: Option<Contact>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    pub first_name: String,
    pub last_name: Option<String>,
    /// Present only when the contact is a Telegram user.
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
}

/// What an update means for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Event {
        event: InboundEvent,
        /// Callback to acknowledge, for button presses.
        callback_id: Option<String>,
    },
    /// A button press outside the `vote_<key>` grammar.
    UnknownAction { callback_id: String },
    Ignored,
}

fn command(text: &str) -> Option<&str> {
    let word = text.trim().strip_prefix('/')?.split_whitespace().next()?;
    Some(word.split('@').next().unwrap_or(word))
}

fn full_name(first: &str, last: Option<&str>) -> String {
    format!("{} {}", first, last.unwrap_or("")).trim().to_string()
}

/// Translate an update into an engine event.
pub fn route(update: &Update, config: &ElectionConfig) -> Routed {
    if let Some(query) = &update.callback_query {
        let voter = VoterId::from(query.from.id);
        return match query
            .data
            .as_deref()
            .and_then(|data| config.parse_callback(data))
        {
            Some(key) => Routed::Event {
                event: InboundEvent::ChoiceSelected {
                    voter,
                    candidate_key: key.to_string(),
                },
                callback_id: Some(query.id.clone()),
            },
            None => Routed::UnknownAction {
                callback_id: query.id.clone(),
            },
        };
    }

    let Some(message) = &update.message else {
        return Routed::Ignored;
    };
    let Some(from) = &message.from else {
        return Routed::Ignored;
    };
    let voter = VoterId::from(from.id);

    let event = if let Some(contact) = &message.contact {
        InboundEvent::ContactPayload {
            voter,
            asserted: contact.user_id.map(VoterId::from),
            phone: contact.phone_number.clone(),
            display_name: full_name(&contact.first_name, contact.last_name.as_deref()),
            handle: from.username.clone(),
        }
    } else if let Some(text) = &message.text {
        match command(text) {
            Some("start") => InboundEvent::InitiateSession {
                voter,
                first_name: Some(from.first_name.clone()),
            },
            Some("cancel") => InboundEvent::CancelRequested { voter },
            Some("result") | Some("results") => InboundEvent::AdminResultsRequested { voter },
            _ => InboundEvent::TextInput {
                voter,
                text: text.clone(),
            },
        }
    } else {
        debug!(update_id = update.update_id, "message without text or contact");
        return Routed::Ignored;
    };

    Routed::Event {
        event,
        callback_id: None,
    }
}

#[derive(Debug, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Serialize)]
pub struct KeyboardButton {
    pub text: String,
    pub request_contact: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Inline {
        inline_keyboard: Vec<Vec<InlineButton>>,
    },
    Keyboard {
        keyboard: Vec<Vec<KeyboardButton>>,
        one_time_keyboard: bool,
        resize_keyboard: bool,
    },
    Remove {
        remove_keyboard: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct SendMessage {
    pub chat_id: VoterId,
    pub text: String,
    pub reply_markup: ReplyMarkup,
}

/// Render a reply as a `sendMessage` call.
pub fn render(chat: &VoterId, reply: &Reply) -> SendMessage {
    let reply_markup = match reply {
        Reply::Text(_) => ReplyMarkup::Remove {
            remove_keyboard: true,
        },
        Reply::ContactRequest { button, .. } => ReplyMarkup::Keyboard {
            keyboard: vec![vec![KeyboardButton {
                text: button.clone(),
                request_contact: true,
            }]],
            one_time_keyboard: true,
            resize_keyboard: true,
        },
        Reply::CandidatePrompt { options, .. } => ReplyMarkup::Inline {
            inline_keyboard: options
                .iter()
                .map(|(data, label)| {
                    vec![InlineButton {
                        text: label.clone(),
                        callback_data: data.clone(),
                    }]
                })
                .collect(),
        },
    };
    SendMessage {
        chat_id: chat.clone(),
        text: reply.text().to_string(),
        reply_markup,
    }
}

/// Where replies go.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn deliver(&self, chat: &VoterId, reply: &Reply) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

#[derive(Serialize)]
struct AnswerCallbackQuery<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Serialize)]
struct SetWebhook<'a> {
    url: &'a str,
    secret_token: &'a str,
    allowed_updates: [&'static str; 2],
    drop_pending_updates: bool,
}

pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, token: &str) -> Self {
        Self {
            http,
            base: format!("{API_BASE}/bot{token}"),
        }
    }

    async fn call<T: Serialize + Sync>(&self, method: &str, body: &T) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/{}", self.base, method))
            .json(body)
            .send()
            .await
            // The URL embeds the bot token.
            .map_err(|e| anyhow!("Failed to send {method} request: {}", e.without_url()))?;

        let status = response.status();
        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse {method} response: {}", e.without_url()))?;
        if !parsed.ok {
            let description = parsed.description.unwrap_or_default();
            error!("Telegram API error in {}: {} - {}", method, status, description);
            return Err(anyhow!("Telegram {method} failed: {status} - {description}"));
        }
        Ok(())
    }

    pub async fn set_webhook(&self, url: &str, secret: &str) -> Result<()> {
        self.call(
            "setWebhook",
            &SetWebhook {
                url,
                secret_token: secret,
                allowed_updates: ["message", "callback_query"],
                drop_pending_updates: true,
            },
        )
        .await
    }
}

#[async_trait]
impl Outbox for TelegramClient {
    async fn deliver(&self, chat: &VoterId, reply: &Reply) -> Result<()> {
        self.call("sendMessage", &render(chat, reply)).await
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.call(
            "answerCallbackQuery",
            &AnswerCallbackQuery {
                callback_query_id: callback_id,
                text,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(value: serde_json::Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    fn text_update(text: &str) -> Update {
        update(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "from": {"id": 42, "is_bot": false, "first_name": "Lesia", "username": "lesia"},
                "chat": {"id": 42, "type": "private"},
                "date": 1700000000,
                "text": text
            }
        }))
    }

    fn voter() -> VoterId {
        VoterId::from(42)
    }

    fn event_of(routed: Routed) -> InboundEvent {
        match routed {
            Routed::Event { event, .. } => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[test]
    fn commands_become_session_events() {
        let config = ElectionConfig::default();
        assert_eq!(
            event_of(route(&text_update("/start"), &config)),
            InboundEvent::InitiateSession {
                voter: voter(),
                first_name: Some("Lesia".into())
            }
        );
        assert_eq!(
            event_of(route(&text_update("/cancel@ballot_bot"), &config)),
            InboundEvent::CancelRequested { voter: voter() }
        );
        assert_eq!(
            event_of(route(&text_update("/result"), &config)),
            InboundEvent::AdminResultsRequested { voter: voter() }
        );
        assert_eq!(
            event_of(route(&text_update("ab12cd34"), &config)),
            InboundEvent::TextInput {
                voter: voter(),
                text: "ab12cd34".into()
            }
        );
    }

    #[test]
    fn contact_carries_its_owner_and_full_name() {
        let routed = route(
            &update(json!({
                "update_id": 2,
                "message": {
                    "message_id": 11,
                    "from": {"id": 42, "is_bot": false, "first_name": "Lesia"},
                    "chat": {"id": 42, "type": "private"},
                    "date": 1700000000,
                    "contact": {
                        "phone_number": "380501112233",
                        "first_name": "Lesia",
                        "last_name": "Ukrainka",
                        "user_id": 42
                    }
                }
            })),
            &ElectionConfig::default(),
        );
        assert_eq!(
            event_of(routed),
            InboundEvent::ContactPayload {
                voter: voter(),
                asserted: Some(voter()),
                phone: "380501112233".into(),
                display_name: "Lesia Ukrainka".into(),
                handle: None,
            }
        );
    }

    #[test]
    fn callbacks_follow_the_vote_grammar() {
        let config = ElectionConfig::default();
        let press = |data: &str| {
            update(json!({
                "update_id": 3,
                "callback_query": {
                    "id": "cb-1",
                    "from": {"id": 42, "is_bot": false, "first_name": "Lesia"},
                    "chat_instance": "x",
                    "data": data
                }
            }))
        };

        assert_eq!(
            route(&press("vote_Yeva Baziuta"), &config),
            Routed::Event {
                event: InboundEvent::ChoiceSelected {
                    voter: voter(),
                    candidate_key: "Yeva Baziuta".into()
                },
                callback_id: Some("cb-1".into()),
            }
        );
        assert_eq!(
            route(&press("delete_everything"), &config),
            Routed::UnknownAction {
                callback_id: "cb-1".into()
            }
        );
    }

    #[test]
    fn stickers_and_service_messages_are_ignored() {
        let routed = route(
            &update(json!({
                "update_id": 4,
                "message": {
                    "message_id": 12,
                    "from": {"id": 42, "is_bot": false, "first_name": "Lesia"},
                    "chat": {"id": 42, "type": "private"},
                    "date": 1700000000,
                    "sticker": {"file_id": "abc"}
                }
            })),
            &ElectionConfig::default(),
        );
        assert_eq!(routed, Routed::Ignored);
    }

    #[test]
    fn replies_render_with_matching_keyboards() {
        let config = ElectionConfig::default();
        let prompt = ballot::Reply::candidate_prompt(&config);
        let rendered = serde_json::to_value(render(&voter(), &prompt)).unwrap();
        assert_eq!(rendered["chat_id"], "42");
        assert_eq!(
            rendered["reply_markup"]["inline_keyboard"][0][0],
            json!({"text": "Вікторія Кочут", "callback_data": "vote_Viktoriia Kochut"})
        );

        let contact = ballot::Reply::contact_request("7-А");
        let rendered = serde_json::to_value(render(&voter(), &contact)).unwrap();
        assert_eq!(
            rendered["reply_markup"]["keyboard"][0][0]["request_contact"],
            true
        );
        assert_eq!(rendered["reply_markup"]["one_time_keyboard"], true);

        let plain = serde_json::to_value(render(&voter(), &Reply::no_session())).unwrap();
        assert_eq!(plain["reply_markup"], json!({"remove_keyboard": true}));
    }
}
