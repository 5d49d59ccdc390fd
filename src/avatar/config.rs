//! Avatar rendering options

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Every option the synthesis service recognises for an avatar session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AvatarConfig {
    /// Avatar character, e.g. "lisa"
    pub character: String,
    /// Pose/style of the character, e.g. "casual-sitting"
    pub style: String,
    /// Synthesis voice name
    pub voice: String,
    /// Speech language tag
    pub language: String,
    /// Speak with the custom avatar's own voice instead of `voice`
    pub use_built_in_voice: bool,
    /// Custom voice deployment id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    /// `character` names a custom (trained) avatar
    pub custom_avatar: bool,
    /// `#RRGGBB` or `#RRGGBBAA`
    pub background_color: String,
    /// Synthesis service endpoint used for offer/answer and speak requests
    pub signaling_url: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            character: "lisa".to_string(),
            style: "casual-sitting".to_string(),
            voice: "ja-JP-NanamiNeural".to_string(),
            language: "ja-JP".to_string(),
            use_built_in_voice: false,
            endpoint_id: None,
            custom_avatar: false,
            background_color: "#FFFFFFFF".to_string(),
            signaling_url: "http://localhost:8000/api/avatar".to_string(),
        }
    }
}

impl AvatarConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("character", &self.character),
            ("style", &self.style),
            ("voice", &self.voice),
            ("language", &self.language),
            ("signaling_url", &self.signaling_url),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("avatar.{} is empty", name)));
            }
        }

        if !is_hex_color(&self.background_color) {
            return Err(AppError::Config(format!(
                "avatar.background_color must be #RRGGBB or #RRGGBBAA, got {:?}",
                self.background_color
            )));
        }

        if matches!(&self.endpoint_id, Some(id) if id.trim().is_empty()) {
            return Err(AppError::Config("avatar.endpoint_id is blank".into()));
        }

        if self.use_built_in_voice && !self.custom_avatar {
            return Err(AppError::Config(
                "avatar.use_built_in_voice requires custom_avatar".into(),
            ));
        }

        Ok(())
    }

    /// Speech markup for one utterance
    pub fn speech_markup(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' \
             xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='{}'>\
             <voice name='{}'><mstts:leadingsilence-exact value='0'/>{}</voice></speak>",
            self.language,
            self.voice,
            escape_xml(text)
        )
    }
}

fn is_hex_color(s: &str) -> bool {
    match s.strip_prefix('#') {
        Some(hex) => (hex.len() == 6 || hex.len() == 8) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
