use super::types::Conversation;

/// Lệnh từ phía người dùng gửi xuống session controller.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Mở một cuộc trò chuyện làm màn hình chính.
    Select(Conversation),
    /// Rời cuộc trò chuyện hiện tại, không chọn cái khác.
    Clear,
    /// Một lần gõ phím trong ô soạn tin.
    Keystroke,
    Send(String),
    /// Gửi lại tin nhắn lỗi theo client reference của nó.
    Retry(String),
    Delete(String),
    Shutdown,
}
