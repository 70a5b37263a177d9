use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short form used in filenames (first 8 hex digits).
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoded image bytes (PNG, JPEG, ...). Equality is byte equality.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBytes(pub Vec<u8>);

impl ImageBytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

// Image payloads can be megabytes; never dump them into logs.
impl std::fmt::Debug for ImageBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImageBytes(len={})", self.0.len())
    }
}

impl From<Vec<u8>> for ImageBytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// Service API key. Held for the lifetime of one session only.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenerationStage {
    Outline,
    StructureControl,
}

impl GenerationStage {
    /// Stable label used in filenames and logs.
    pub fn label(self) -> &'static str {
        match self {
            GenerationStage::Outline => "outline",
            GenerationStage::StructureControl => "final",
        }
    }

    pub fn number(self) -> u8 {
        match self {
            GenerationStage::Outline => 1,
            GenerationStage::StructureControl => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Ethnicity {
    #[default]
    Asian,
    Caucasian,
    African,
    Latino,
    MiddleEastern,
    SouthAsian,
    Mixed,
}

impl Ethnicity {
    pub const ALL: [Ethnicity; 7] = [
        Ethnicity::Asian,
        Ethnicity::Caucasian,
        Ethnicity::African,
        Ethnicity::Latino,
        Ethnicity::MiddleEastern,
        Ethnicity::SouthAsian,
        Ethnicity::Mixed,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Ethnicity::Asian => "Asian",
            Ethnicity::Caucasian => "Caucasian",
            Ethnicity::African => "African",
            Ethnicity::Latino => "Latino",
            Ethnicity::MiddleEastern => "Middle Eastern",
            Ethnicity::SouthAsian => "South Asian",
            Ethnicity::Mixed => "Mixed",
        }
    }

    /// Fragment spliced into the `{ethnicity_prompt}` placeholder.
    pub fn prompt_fragment(self) -> &'static str {
        match self {
            Ethnicity::Asian => "Asian baby features, ",
            Ethnicity::Caucasian => "Caucasian baby features, ",
            Ethnicity::African => "African baby features, ",
            Ethnicity::Latino => "Latino baby features, ",
            Ethnicity::MiddleEastern => "Middle Eastern baby features, ",
            Ethnicity::SouthAsian => "South Asian baby features, ",
            Ethnicity::Mixed => "",
        }
    }

    /// Parses a display name, case-insensitively; `-`, `_` and spaces are interchangeable.
    pub fn parse(value: &str) -> Option<Self> {
        let wanted = normalize(value);
        Self::ALL
            .into_iter()
            .find(|e| normalize(e.display_name()) == wanted)
    }
}

fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }
}
