//! Bot API update types to the platform-neutral ones in `siahe-core`.

use teloxide::types as tg;
use tracing::warn;

use siahe_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    update::{CallbackQuery, Event, Message, Update},
};

pub fn update(u: tg::Update) -> Update {
    let event = match u.kind {
        tg::UpdateKind::Message(m) => Event::NewMessage(message(&m)),
        tg::UpdateKind::EditedMessage(m) => Event::EditedMessage(message(&m)),
        tg::UpdateKind::CallbackQuery(q) => Event::CallbackQuery(callback_query(&q)),
        tg::UpdateKind::Error(raw) => {
            warn!(update_id = u.id, raw = %raw, "cannot parse update");
            Event::Other
        }
        _ => Event::Other,
    };
    Update {
        id: u.id as i64,
        event,
    }
}

fn message(m: &tg::Message) -> Message {
    let from = m.from();
    Message {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
        user_id: from.map(|u| UserId(u.id.0 as i64)),
        username: from.and_then(|u| u.username.clone()),
        text: m.text().map(str::to_string),
    }
}

fn callback_query(q: &tg::CallbackQuery) -> CallbackQuery {
    CallbackQuery {
        id: q.id.clone(),
        user_id: UserId(q.from.id.0 as i64),
        username: q.from.username.clone(),
        data: q.data.clone(),
        message: q.message.as_ref().map(|m| MessageRef {
            chat_id: ChatId(m.chat.id.0),
            message_id: MessageId(m.id.0),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> serde_json::Value {
        json!({ "id": 77, "is_bot": false, "first_name": "Ada", "username": "ada" })
    }

    fn raw_message(text: &str) -> serde_json::Value {
        json!({
            "message_id": 12,
            "date": 1_700_000_000,
            "chat": { "id": 77, "type": "private", "first_name": "Ada" },
            "from": user(),
            "text": text
        })
    }

    // teloxide only deserializes updates reliably from text.
    fn parse(v: serde_json::Value) -> tg::Update {
        serde_json::from_str(&v.to_string()).unwrap()
    }

    #[test]
    fn converts_new_text_message() {
        let u = update(parse(json!({ "update_id": 5, "message": raw_message("/ping") })));

        assert_eq!(u.id, 5);
        let msg = u.message().unwrap();
        assert_eq!(msg.chat_id, ChatId(77));
        assert_eq!(msg.message_id, MessageId(12));
        assert_eq!(msg.user_id, Some(UserId(77)));
        assert_eq!(msg.username.as_deref(), Some("ada"));
        assert_eq!(msg.text.as_deref(), Some("/ping"));
    }

    #[test]
    fn converts_edits_separately_from_new_messages() {
        let mut edited = raw_message("fixed");
        edited["edit_date"] = json!(1_700_000_100);
        let u = update(parse(json!({ "update_id": 6, "edited_message": edited })));

        assert!(matches!(u.event, Event::EditedMessage(ref m) if m.text.as_deref() == Some("fixed")));
    }

    #[test]
    fn converts_callback_query_with_origin_message() {
        let u = update(parse(json!({
            "update_id": 9,
            "callback_query": {
                "id": "cb-1",
                "from": user(),
                "chat_instance": "ci",
                "data": "confirm",
                "message": raw_message("pick one")
            }
        })));

        let q = u.callback_query().unwrap();
        assert_eq!(q.id, "cb-1");
        assert_eq!(q.user_id, UserId(77));
        assert_eq!(q.data.as_deref(), Some("confirm"));
        assert_eq!(
            q.message,
            Some(MessageRef {
                chat_id: ChatId(77),
                message_id: MessageId(12),
            })
        );
    }

    #[test]
    fn unparseable_update_becomes_other() {
        let u = update(tg::Update {
            id: 11,
            kind: tg::UpdateKind::Error(json!({ "message": { "message_id": "x" } })),
        });
        assert_eq!(u.id, 11);
        assert!(matches!(u.event, Event::Other));
    }
}
