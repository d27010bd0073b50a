//! TMDB v3 client and the `MetadataProvider` seam the matcher and runner use.
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::ProviderError;
use crate::util::env::{env_opt, env_parse, env_req};

const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
const DEFAULT_IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/";
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Clone)]
pub struct TmdbConfig {
    pub api_key: String,
    pub base_url: String,
    pub image_base_url: String,
    pub poster_size: String,
    pub backdrop_size: String,
    pub timeout: Duration,
    pub requests_per_window: usize,
    pub window: Duration,
    pub max_cast: usize,
}

impl TmdbConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            image_base_url: DEFAULT_IMAGE_BASE_URL.into(),
            poster_size: "w342".into(),
            backdrop_size: "w780".into(),
            timeout: Duration::from_secs(10),
            requests_per_window: 40,
            window: Duration::from_secs(10),
            max_cast: 3,
        }
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::new(env_req("TMDB_API_KEY")?);
        if let Some(v) = env_opt("TMDB_BASE_URL") {
            cfg.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = env_opt("TMDB_IMAGE_BASE_URL") {
            cfg.image_base_url = v;
        }
        cfg.timeout = Duration::from_secs(env_parse("TMDB_TIMEOUT_SECS", 10u64).max(1));
        cfg.requests_per_window = env_parse("TMDB_REQUESTS_PER_WINDOW", 40usize).max(1);
        cfg.window = Duration::from_secs(env_parse("TMDB_WINDOW_SECS", 10u64).max(1));
        cfg.max_cast = env_parse("TMDB_MAX_CAST", 3usize);
        Ok(cfg)
    }

    /// Full image URL for a TMDB file path such as `/abc.jpg`.
    pub fn image_url(&self, size: &str, path: Option<&str>) -> Option<String> {
        image_url(&self.image_base_url, size, path)
    }
}

pub fn image_url(base: &str, size: &str, path: Option<&str>) -> Option<String> {
    let path = path.map(str::trim).filter(|p| !p.is_empty())?;
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Some(format!("{base}/{size}/{path}"))
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub popularity: f64,
}

impl Candidate {
    pub fn year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Genre {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MovieDetails {
    pub id: i64,
    #[serde(default)]
    pub runtime: Option<i32>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CastMember {
    pub name: String,
    #[serde(default)]
    pub order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CrewMember {
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
}

impl Credits {
    pub fn directors(&self) -> impl Iterator<Item = &str> {
        self.crew
            .iter()
            .filter(|c| c.job.as_deref() == Some("Director"))
            .map(|c| c.name.as_str())
    }

    /// Top-billed cast names, in billing order.
    pub fn top_cast(&self, n: usize) -> Vec<&str> {
        let mut cast: Vec<&CastMember> = self.cast.iter().collect();
        cast.sort_by_key(|c| c.order.unwrap_or(i32::MAX));
        cast.into_iter().take(n).map(|c| c.name.as_str()).collect()
    }
}

/// External movie catalog.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn search(&self, title: &str, year: Option<i32>) -> Result<Vec<Candidate>, ProviderError>;

    async fn details(&self, id: i64) -> Result<MovieDetails, ProviderError>;

    async fn credits(&self, id: i64) -> Result<Credits, ProviderError>;
}

pub struct TmdbClient {
    http: Client,
    cfg: TmdbConfig,
}

impl TmdbClient {
    pub fn new(cfg: TmdbConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(cfg.timeout)
            .user_agent(concat!("indieflix/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &TmdbConfig {
        &self.cfg
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.cfg.base_url, path);
        debug!(%path, "tmdb request");
        let resp = self
            .http
            .get(&url)
            .query(&[("api_key", self.cfg.api_key.as_str())])
            .query(params)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }
        decode(&body)
    }
}

pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))
}

pub fn decode_search(body: &str) -> Result<Vec<Candidate>, ProviderError> {
    decode::<SearchPage>(body).map(|p| p.results)
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    async fn search(&self, title: &str, year: Option<i32>) -> Result<Vec<Candidate>, ProviderError> {
        let mut params = vec![("query", title.to_string())];
        if let Some(y) = year {
            params.push(("year", y.to_string()));
        }
        let page: SearchPage = self.get_json("search/movie", &params).await?;
        Ok(page.results)
    }

    async fn details(&self, id: i64) -> Result<MovieDetails, ProviderError> {
        self.get_json(&format!("movie/{id}"), &[]).await
    }

    async fn credits(&self, id: i64) -> Result<Credits, ProviderError> {
        self.get_json(&format!("movie/{id}/credits"), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_search_page() {
        let hits = decode_search(
            r#"{"page":1,"total_results":2,"results":[
                {"id":426063,"title":"Nosferatu","original_title":"Nosferatu","release_date":"2024-12-25","popularity":212.4},
                {"id":653,"title":"Nosferatu","release_date":"1922-02-16","popularity":18.1,"adult":false},
                {"id":1,"title":"Untitled","release_date":""}
            ]}"#,
        )
        .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].year(), Some(2024));
        assert_eq!(hits[1].year(), Some(1922));
        assert_eq!(hits[2].year(), None);
        assert_eq!(hits[2].popularity, 0.0);
    }

    #[test]
    fn decode_errors_are_typed() {
        assert!(matches!(decode_search("<html>"), Err(ProviderError::Decode(_))));
        assert_eq!(decode_search("{}").unwrap(), vec![]);
    }

    #[test]
    fn decodes_details_and_credits() {
        let details: MovieDetails = decode(
            r#"{"id":426063,"runtime":132,"vote_average":6.7,"genres":[{"id":27,"name":"Horror"},{"id":14,"name":"Fantasy"}],
                "overview":"A gothic tale","poster_path":"/5qGIxdEO841C0tdY8vOdLoRVrr0.jpg","backdrop_path":null}"#,
        )
        .unwrap();
        assert_eq!(details.runtime, Some(132));
        assert_eq!(details.genres.len(), 2);
        assert_eq!(details.backdrop_path, None);

        let credits: Credits = decode(
            r#"{"id":426063,
                "cast":[{"name":"Nicholas Hoult","order":2},{"name":"Lily-Rose Depp","order":0},
                        {"name":"Bill Skarsgård","order":1},{"name":"Aaron Taylor-Johnson","order":3}],
                "crew":[{"name":"Robert Eggers","job":"Director"},{"name":"Jarin Blaschke","job":"Director of Photography"}]}"#,
        )
        .unwrap();
        assert_eq!(credits.directors().collect::<Vec<_>>(), vec!["Robert Eggers"]);
        assert_eq!(
            credits.top_cast(3),
            vec!["Lily-Rose Depp", "Bill Skarsgård", "Nicholas Hoult"]
        );
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_api_key() {
        let mut cfg = TmdbConfig::new("SUPERSECRETKEY123");
        cfg.base_url = "http://127.0.0.1:1".into();
        cfg.timeout = Duration::from_secs(2);
        let client = TmdbClient::new(cfg).unwrap();

        let err = client.search("Anora", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_) | ProviderError::Timeout));
        let text = format!("{err} {err:?}");
        assert!(!text.contains("SUPERSECRETKEY123"), "{text}");
        assert!(!text.contains("api_key"), "{text}");
    }

    #[test]
    fn builds_image_urls() {
        let cfg = TmdbConfig::new("k");
        assert_eq!(
            cfg.image_url("w342", Some("/p.jpg")).as_deref(),
            Some("https://image.tmdb.org/t/p/w342/p.jpg")
        );
        assert_eq!(cfg.image_url("w780", None), None);
        assert_eq!(cfg.image_url("w780", Some("")), None);
    }
}
