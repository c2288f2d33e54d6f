use api::{AiChatEntry, AiChatRequest, Conversation, Direction, Message, MessageId, Page};

#[test]
fn test_message_optional_fields_default() {
    let json = r#"{
        "id": 42,
        "direction": "in",
        "content": "Can we move Tuesday's lesson?",
        "created_at": "2026-03-01T10:00:00Z"
    }"#;
    let message: Message = serde_json::from_str(json).unwrap();

    assert_eq!(message.id, MessageId(42));
    assert_eq!(message.direction, Direction::In);
    assert!(message.updated_at.is_none());
    assert!(!message.read_by_me);
}

#[test]
fn test_page_of_messages_keeps_wire_order() {
    let json = r#"{"items": [
        {"id": 3, "direction": "out", "content": "c", "created_at": "2026-03-01T10:02:00Z", "read_by_me": true},
        {"id": 2, "direction": "in", "content": "b", "created_at": "2026-03-01T10:01:00Z"},
        {"id": 1, "direction": "in", "content": "a", "created_at": "2026-03-01T10:00:00Z"}
    ]}"#;
    let page: Page<Message> = serde_json::from_str(json).unwrap();

    let ids: Vec<i64> = page.items.iter().map(|m| m.id.0).collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert!(page.items[0].read_by_me);
}

#[test]
fn test_conversation_without_last_message() {
    let json = r#"{"id": 7, "subject_id": 99, "display_name": "Anna (parent)"}"#;
    let conversation: Conversation = serde_json::from_str(json).unwrap();

    assert_eq!(conversation.id.0, 7);
    assert!(conversation.last_message.is_none());
    assert_eq!(conversation.unread_from_subject, 0);
}

#[test]
fn test_ai_chat_request_shape() {
    let request = AiChatRequest {
        message: "Draft a reply".to_string(),
        history: vec![AiChatEntry::user("hi"), AiChatEntry::assistant("hello")],
    };
    let value = serde_json::to_value(&request).unwrap();

    assert_eq!(value["message"], "Draft a reply");
    assert_eq!(value["history"][0]["role"], "user");
    assert_eq!(value["history"][1]["role"], "assistant");
}
