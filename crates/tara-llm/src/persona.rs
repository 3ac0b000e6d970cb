use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use thiserror::Error;

/// How the assistant names itself and the models behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Present as Tara and hide the upstream model family
    #[default]
    Custom,
    /// Use the upstream model names
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown display mode '{0}' (expected custom or original)")]
pub struct UnknownDisplayMode(pub String);

impl FromStr for DisplayMode {
    type Err = UnknownDisplayMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "custom" => Ok(DisplayMode::Custom),
            "original" => Ok(DisplayMode::Original),
            other => Err(UnknownDisplayMode(other.to_string())),
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisplayMode::Custom => "custom",
            DisplayMode::Original => "original",
        })
    }
}

const MODEL_NAMES: &[(&str, &str, &str)] = &[
    ("gemini-1.5-flash", "Tara 1.5 Flash", "Gemini 1.5 Flash"),
    ("gemini-2.0-flash", "Tara 2.0 Flash", "Gemini 2.0 Flash"),
    ("gemini-2.5-flash", "Tara 2.5 Flash", "Gemini 2.5 Flash"),
    ("gemini-1.5-pro", "Tara Pro", "Gemini 1.5 Pro"),
];

const THREAD_ADDENDUM: &str = "IMPORTANT: You are responding in a reply thread. \
The user is asking a follow-up question about a previous message. The context includes \
the main conversation up to the message being replied to, followed by the messages in this thread. \
Keep your response focused on the specific question in this thread.";

#[derive(Debug, Clone, Default)]
pub struct Persona {
    mode: DisplayMode,
}

impl Persona {
    pub fn new(mode: DisplayMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn identity(&self) -> &'static str {
        match self.mode {
            DisplayMode::Custom => {
                "Tara, a helpful AI assistant created by Karmalok. You are powered by advanced AI \
                 technology but should identify yourself as Tara, not as Gemini or any other AI model."
            }
            DisplayMode::Original => "a helpful AI assistant.",
        }
    }

    pub fn system_prompt(&self, threaded: bool, today: NaiveDate) -> String {
        let mut prompt = format!(
            "You are {} You can help with various tasks. Today's date is {}.",
            self.identity(),
            today.format("%Y-%m-%d")
        );
        if threaded {
            prompt.push_str("\n\n");
            prompt.push_str(THREAD_ADDENDUM);
        }
        prompt
    }

    /// Human-facing name for a model id; unknown ids pass through.
    pub fn display_name<'a>(&self, model_id: &'a str) -> &'a str {
        MODEL_NAMES
            .iter()
            .find(|(id, _, _)| *id == model_id)
            .map(|(_, custom, original)| match self.mode {
                DisplayMode::Custom => *custom,
                DisplayMode::Original => *original,
            })
            .unwrap_or(model_id)
    }

    pub fn title_prompt(&self, user_text: &str, assistant_text: &str) -> String {
        format!(
            "Summarize the following conversation with a short, descriptive title \
             (less than 5 words). Reply with the title only.\n\nUser: {user_text}\nAssistant: {assistant_text}"
        )
    }
}

/// Trim a generated title to something fit for the history list.
pub fn clean_title(raw: &str) -> Option<String> {
    let title = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '#')
        .trim();

    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(80).collect())
}
