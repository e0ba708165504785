use anyhow::Context;
use docship_core::NodeId;

const DEFAULT_PARENT_ID: i64 = 2000;

#[derive(Clone, Debug)]
pub struct UploaderConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub parent_id: NodeId,
}

impl UploaderConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            std::env::var("DOCSHIP_BASE_URL").context("DOCSHIP_BASE_URL is not set")?;
        let username =
            std::env::var("DOCSHIP_USERNAME").context("DOCSHIP_USERNAME is not set")?;
        let password =
            std::env::var("DOCSHIP_PASSWORD").context("DOCSHIP_PASSWORD is not set")?;
        let parent_id = NodeId(read_i64_env("DOCSHIP_PARENT_ID", DEFAULT_PARENT_ID));

        Ok(Self {
            base_url,
            username,
            password,
            parent_id,
        })
    }
}

fn read_i64_env(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}
