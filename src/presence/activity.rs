use serde::{Deserialize, Serialize};

pub const EDITOR_IMAGE: &str = "neovim";
pub const EDITOR_TEXT: &str = "Neovim FTW";
pub const IDLE_TEXT: &str = "The one true editor";

/// Artwork keys and hover texts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Unix seconds
    pub start: i64,
}

/// The presence payload shown by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub assets: Assets,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
}

impl Activity {
    /// Start the elapsed-time counter once; later calls keep the first value.
    pub fn start_clock(&mut self, now_unix: i64) {
        self.timestamps.get_or_insert(Timestamps { start: now_unix });
    }

    /// Reset artwork to the editor logo in the small slot.
    pub fn editor_assets(&mut self) {
        self.assets = Assets {
            small_image: Some(EDITOR_IMAGE.to_string()),
            small_text: Some(EDITOR_TEXT.to_string()),
            ..Assets::default()
        };
    }

    /// Generic activity without file details.
    pub fn idle(&mut self) {
        self.assets = Assets {
            large_image: Some(EDITOR_IMAGE.to_string()),
            large_text: Some(IDLE_TEXT.to_string()),
            ..Assets::default()
        };
    }

    /// Describe editing `file_name` of `filetype`, inside `workspace` if known.
    pub fn editing(&mut self, file_name: &str, filetype: &str, workspace: Option<&str>) {
        self.editor_assets();
        self.assets.large_image = Some(super::filetype::image_key(filetype));
        self.assets.large_text = Some(format!("Filetype: {}", filetype.to_uppercase()));
        self.details = Some(format!("Editing {file_name}"));
        if let Some(workspace) = workspace {
            self.state = Some(format!("Working on {workspace}"));
        }
    }
}
