use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Text-to-image.
    Image,
    /// Image edit with a reference image.
    Edit,
    /// Text/image-to-video.
    Video,
    /// Video model can render a soundtrack.
    VideoAudio,
    /// Video model can render 1080p.
    Video1080p,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Edit => "edit",
            Self::Video => "video",
            Self::VideoAudio => "video_audio",
            Self::Video1080p => "video_1080p",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim().trim_start_matches("models/"))
    }

    /// Models supporting `capability`, in registration order. The first entry is
    /// the default for that capability.
    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();
    let mut insert = |name: &str, provider: &str, capabilities: &[Capability]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.to_vec(),
            },
        );
    };

    insert(
        "gemini-2.5-flash-image-preview",
        "gemini",
        &[Capability::Image, Capability::Edit],
    );
    insert(
        "gemini-2.0-flash-preview-image-generation",
        "gemini",
        &[Capability::Image, Capability::Edit],
    );
    insert(
        "veo-3.0-generate-preview",
        "veo",
        &[
            Capability::Video,
            Capability::VideoAudio,
            Capability::Video1080p,
        ],
    );
    insert(
        "veo-3.0-fast-generate-preview",
        "veo",
        &[
            Capability::Video,
            Capability::VideoAudio,
            Capability::Video1080p,
        ],
    );
    insert("veo-2.0-generate-001", "veo", &[Capability::Video]);

    map
}
