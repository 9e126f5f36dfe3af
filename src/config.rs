use std::time::Duration;

use anyhow::Context;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // address the app will bind to
    #[clap(long, env, default_value = "0.0.0.0")]
    pub host: String,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // where the generator and player pages live
    #[clap(long, env, default_value = "public")]
    pub static_dir: String,

    // hard bound on every manifest fetch, also used as connect/read timeout for segments
    #[clap(long, env, default_value = "30")]
    pub upstream_timeout_secs: u64,

    // everything below is the identity we present to the origin, most cdns check at least the
    // user agent and referer so set these to whatever the player site would send
    #[clap(long, env, default_value = DEFAULT_USER_AGENT)]
    pub upstream_user_agent: String,

    #[clap(long, env, default_value = "*/*")]
    pub upstream_accept: String,

    #[clap(long, env, default_value = "en-US,en;q=0.9")]
    pub upstream_accept_language: String,

    #[clap(long, env)]
    pub upstream_referer: Option<String>,

    #[clap(long, env)]
    pub upstream_origin: Option<String>,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    // mirrors the clap defaults so tests can build a config without touching the env
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            host: "0.0.0.0".to_string(),
            port: 5000,
            cors_origin: "*".to_string(),
            static_dir: "public".to_string(),
            upstream_timeout_secs: 30,
            upstream_user_agent: DEFAULT_USER_AGENT.to_string(),
            upstream_accept: "*/*".to_string(),
            upstream_accept_language: "en-US,en;q=0.9".to_string(),
            upstream_referer: None,
            upstream_origin: None,
            sentry_dsn: None,
        }
    }
}

impl AppConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn upstream_identity(&self) -> UpstreamIdentity {
        UpstreamIdentity {
            user_agent: self.upstream_user_agent.clone(),
            accept: self.upstream_accept.clone(),
            accept_language: self.upstream_accept_language.clone(),
            referer: self.upstream_referer.clone(),
            origin: self.upstream_origin.clone(),
        }
    }
}

/// The fixed header set every outbound fetch carries. Built once at startup and never mutated.
#[derive(Clone, Debug)]
pub struct UpstreamIdentity {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub referer: Option<String>,
    pub origin: Option<String>,
}

impl UpstreamIdentity {
    pub fn header_map(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        Self::insert(&mut headers, header::USER_AGENT, &self.user_agent)?;
        Self::insert(&mut headers, header::ACCEPT, &self.accept)?;
        Self::insert(&mut headers, header::ACCEPT_LANGUAGE, &self.accept_language)?;

        if let Some(referer) = &self.referer {
            Self::insert(&mut headers, header::REFERER, referer)?;
        }
        if let Some(origin) = &self.origin {
            Self::insert(&mut headers, header::ORIGIN, origin)?;
        }

        // browsers always send these on cross-site fetches, some cdns reject without them
        Self::insert(&mut headers, HeaderName::from_static("sec-fetch-dest"), "empty")?;
        Self::insert(&mut headers, HeaderName::from_static("sec-fetch-mode"), "cors")?;
        Self::insert(&mut headers, HeaderName::from_static("sec-fetch-site"), "cross-site")?;

        Ok(headers)
    }

    fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) -> anyhow::Result<()> {
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for upstream header {}", name))?;
        headers.insert(name, value);
        Ok(())
    }
}
