// Input domain commands
//
// Synthetic keyboard input for driving a focused element

use crate::connection::CdpConnection;
use crate::protocol::CdpResult;
use serde::Serialize;
use serde_json::json;

pub const INSERT_TEXT: &str = "Input.insertText";
pub const DISPATCH_KEY_EVENT: &str = "Input.dispatchKeyEvent";

/// Modifier bit flags used by Input.dispatchKeyEvent
pub mod modifiers {
    pub const ALT: u8 = 1;
    pub const CTRL: u8 = 2;
    pub const META: u8 = 4;
    pub const SHIFT: u8 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyEventKind {
    #[serde(rename = "keyDown")]
    KeyDown,
    #[serde(rename = "keyUp")]
    KeyUp,
    #[serde(rename = "char")]
    Char,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyEvent {
    #[serde(rename = "type")]
    pub kind: KeyEventKind,
    pub key: String,
    pub code: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub modifiers: u8,
}

fn is_zero(value: &u8) -> bool {
    *value == 0
}

impl KeyEvent {
    pub fn new(kind: KeyEventKind, key: &str, code: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
            code: code.to_string(),
            modifiers: 0,
        }
    }

    pub fn with_modifiers(mut self, modifiers: u8) -> Self {
        self.modifiers = modifiers;
        self
    }
}

impl CdpConnection {
    /// Type text into whatever currently has focus
    pub async fn insert_text(&self, text: &str) -> CdpResult<()> {
        self.send(INSERT_TEXT, json!({ "text": text }))
            .await?
            .check_error()
    }

    pub async fn dispatch_key_event(&self, event: &KeyEvent) -> CdpResult<()> {
        self.send(DISPATCH_KEY_EVENT, event).await?.check_error()
    }

    /// keyDown followed by keyUp
    pub async fn press_key(&self, key: &str, code: &str, modifiers: u8) -> CdpResult<()> {
        let down = KeyEvent::new(KeyEventKind::KeyDown, key, code).with_modifiers(modifiers);
        self.dispatch_key_event(&down).await?;

        let up = KeyEvent::new(KeyEventKind::KeyUp, key, code).with_modifiers(modifiers);
        self.dispatch_key_event(&up).await
    }
}
