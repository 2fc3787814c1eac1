/// Answers which runtime platform the core is running on.
pub trait PlatformQuery: Send + Sync {
    fn current_platform_id(&self) -> String;
}

/// A platform id fixed at startup.
#[derive(Debug, Clone)]
pub struct StaticPlatform {
    id: String,
}

impl StaticPlatform {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl PlatformQuery for StaticPlatform {
    fn current_platform_id(&self) -> String {
        self.id.clone()
    }
}
