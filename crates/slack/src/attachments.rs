use chrono::{DateTime, Utc};
use kunly_core::config::NotifierConfig;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttachmentField {
    pub title: String,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub short: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<AttachmentField>,
}

/// One message to post; immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

/// JSON body of a `chat.postMessage` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostMessageBody {
    pub channel: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty() || !self.attachments.is_empty()
    }

    pub fn to_post_body(&self) -> PostMessageBody {
        PostMessageBody {
            channel: self.channel_id.clone(),
            text: self.text.clone(),
            attachments: self.attachments.clone(),
        }
    }
}

pub struct MessageBuilder {
    channel_id: String,
    text: String,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self { channel_id: channel_id.into(), text: String::new(), attachments: Vec::new() }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn attachment<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut AttachmentBuilder),
    {
        let mut builder = AttachmentBuilder::default();
        build(&mut builder);
        self.attachments.push(builder.build());
        self
    }

    pub fn build_at(self, created_at: DateTime<Utc>) -> OutboundMessage {
        OutboundMessage {
            channel_id: self.channel_id,
            text: self.text,
            attachments: self.attachments,
            created_at,
        }
    }

    pub fn build(self) -> OutboundMessage {
        self.build_at(Utc::now())
    }
}

#[derive(Default)]
pub struct AttachmentBuilder {
    attachment: Attachment,
}

impl AttachmentBuilder {
    pub fn pretext(&mut self, pretext: impl Into<String>) -> &mut Self {
        self.attachment.pretext = Some(pretext.into());
        self
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.attachment.text = Some(text.into());
        self
    }

    pub fn color(&mut self, color: impl Into<String>) -> &mut Self {
        self.attachment.color = Some(color.into());
        self
    }

    pub fn field(&mut self, title: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.attachment.fields.push(AttachmentField {
            title: title.into(),
            value: value.into(),
            short: false,
        });
        self
    }

    fn build(self) -> Attachment {
        self.attachment
    }
}

/// The message posted once when the bot starts.
pub fn startup_notice(
    channel_id: &str,
    config: &NotifierConfig,
    created_at: DateTime<Utc>,
) -> OutboundMessage {
    MessageBuilder::new(channel_id)
        .text(config.text.clone())
        .attachment(|attachment| {
            attachment
                .pretext(config.pretext.clone())
                .text("test text")
                .color(config.color.clone())
                .field("Date", created_at.to_rfc3339());
        })
        .build_at(created_at)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use kunly_core::config::AppConfig;
    use serde_json::json;

    use super::{startup_notice, MessageBuilder};

    #[test]
    fn startup_notice_matches_default_layout() {
        let created_at = Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).single().expect("time");
        let config = AppConfig::default();

        let message = startup_notice("C123", &config.notifier, created_at);
        let body = serde_json::to_value(message.to_post_body()).expect("serialize");

        assert_eq!(
            body,
            json!({
                "channel": "C123",
                "text": "New message from bot",
                "attachments": [{
                    "pretext": "Kunly Bot Message",
                    "text": "test text",
                    "color": "#36a64f",
                    "fields": [{ "title": "Date", "value": "2026-10-19T09:30:00+00:00" }]
                }]
            })
        );
    }

    #[test]
    fn construction_is_deterministic_for_a_fixed_time() {
        let created_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("time");
        let config = AppConfig::default();

        let first = startup_notice("C123", &config.notifier, created_at);
        let second = startup_notice("C123", &config.notifier, created_at);

        assert_eq!(first, second);
        assert_eq!(first.to_post_body(), second.to_post_body());
    }

    #[test]
    fn empty_text_without_attachments_has_no_content() {
        let message = MessageBuilder::new("C123").text("   ").build();
        assert!(!message.has_content());

        let body = serde_json::to_value(
            MessageBuilder::new("C123").attachment(|a| {
                a.color("#000000");
            })
            .build()
            .to_post_body(),
        )
        .expect("serialize");
        assert!(body.get("text").is_none(), "empty text is omitted from the body");
    }
}
