use crate::chat::{SessionPhase, TypingState};
use crate::error::ApiError;

use super::types::{Message, NotificationEntry};

/// Sự kiện gửi vào session controller, từ handler của tầng mạng hoặc từ
/// các lời gọi bất đồng bộ mà controller đã phát ra trước đó.
///
/// Kết quả bất đồng bộ mang theo bộ đếm activation lúc phát lệnh, để nhận
/// ra kết quả về muộn sau khi đã chuyển cuộc trò chuyện.
#[derive(Debug)]
pub enum SessionEvent {
    Connected,
    MessageReceived(Message),
    MessageSeen {
        message_id: String,
        user_id: String,
    },
    MessageDeleted {
        conversation_id: String,
        message_id: String,
    },
    PeerTyping {
        conversation_id: String,
    },
    PeerStoppedTyping {
        conversation_id: String,
    },
    HistoryLoaded {
        conversation_id: String,
        activation: u64,
        result: Result<Vec<Message>, ApiError>,
    },
    SendCompleted {
        conversation_id: String,
        activation: u64,
        client_ref: String,
        result: Result<Message, ApiError>,
    },
    DeleteCompleted {
        conversation_id: String,
        activation: u64,
        message_id: String,
        result: Result<(), ApiError>,
    },
    LocalTypingExpired {
        conversation_id: String,
        timer: u64,
    },
    PeerTypingExpired {
        timer: u64,
    },
}

/// Ảnh chụp trạng thái session gửi lên tầng hiển thị.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Phase(SessionPhase),
    Timeline {
        conversation_id: String,
        messages: Vec<Message>,
    },
    Notifications(Vec<NotificationEntry>),
    Typing(TypingState),
    Error(String),
}
