use typed_builder::TypedBuilder;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Settings of a [`ShortenerService`](crate::ShortenerService).
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct ShortenerConfig {
    /// Prefix of every returned short URL, e.g. `https://tiny.example`.
    #[builder(default = DEFAULT_BASE_URL.to_string(), setter(into))]
    pub base_url: String,
}

impl Default for ShortenerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
