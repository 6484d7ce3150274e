use futures::future::{BoxFuture, FutureExt};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{Config, RemoteConfig};
use crate::error::FetchError;

use super::api_types::{parse_lead, parse_leads, FetchedLeads};
use super::types::{Lead, Owner};

/// Source of authoritative lead data.
///
/// Both calls are read-only on the server and safe to repeat. An empty list
/// is a real answer; failures are always an `Err`.
pub trait LeadSource: Send + Sync {
  fn fetch_all<'a>(&'a self, owner: &'a Owner) -> BoxFuture<'a, Result<FetchedLeads, FetchError>>;

  fn fetch_one<'a>(
    &'a self,
    id: &'a str,
    owner: &'a Owner,
  ) -> BoxFuture<'a, Result<Lead, FetchError>>;
}

/// Lead API client over HTTP.
#[derive(Clone)]
pub struct HttpLeadSource {
  client: reqwest::Client,
  list_url: Url,
  token: Option<String>,
}

impl HttpLeadSource {
  pub fn new(config: &RemoteConfig, token: Option<String>) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .gzip(true)
      .build()
      .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      list_url: list_url(&config.url, &config.list_path)?,
      token,
    })
  }

  pub fn from_config(config: &Config) -> Result<Self, FetchError> {
    Self::new(&config.remote, Config::get_api_token())
  }

  async fn get(&self, url: Url) -> Result<(reqwest::StatusCode, Vec<u8>), FetchError> {
    debug!(%url, "GET");
    let mut request = self.client.get(url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    let body = response.bytes().await?;
    Ok((status, body.to_vec()))
  }
}

impl LeadSource for HttpLeadSource {
  fn fetch_all<'a>(&'a self, owner: &'a Owner) -> BoxFuture<'a, Result<FetchedLeads, FetchError>> {
    async move {
      let (status, body) = self.get(all_url(&self.list_url, owner)).await?;
      if !status.is_success() {
        return Err(FetchError::Status {
          status: status.as_u16(),
        });
      }
      Ok(parse_leads(&body)?)
    }
    .boxed()
  }

  fn fetch_one<'a>(
    &'a self,
    id: &'a str,
    owner: &'a Owner,
  ) -> BoxFuture<'a, Result<Lead, FetchError>> {
    async move {
      let (status, body) = self.get(one_url(&self.list_url, id, owner)?).await?;
      if status == reqwest::StatusCode::NOT_FOUND {
        return Err(FetchError::NotFound(id.to_string()));
      }
      if !status.is_success() {
        return Err(FetchError::Status {
          status: status.as_u16(),
        });
      }
      Ok(parse_lead(&body)?)
    }
    .boxed()
  }
}

fn owner_query(url: &mut Url, owner: &Owner) {
  let mut query = url.query_pairs_mut();
  query.append_pair("ownerId", &owner.id);
  query.append_pair("ownerEmail", &owner.email);
  if let Some(team) = &owner.team {
    query.append_pair("team", team);
  }
}

fn all_url(list_url: &Url, owner: &Owner) -> Url {
  let mut url = list_url.clone();
  owner_query(&mut url, owner);
  url
}

fn one_url(list_url: &Url, id: &str, owner: &Owner) -> Result<Url, FetchError> {
  let mut url = list_url.clone();
  url
    .path_segments_mut()
    .map_err(|_| FetchError::Transport(format!("cannot append a path to {}", list_url)))?
    .pop_if_empty()
    .push(id);
  owner_query(&mut url, owner);
  Ok(url)
}

/// Resolve the list endpoint against the base URL, keeping any base path.
fn list_url(base: &str, list_path: &str) -> Result<Url, FetchError> {
  let mut base = Url::parse(base)
    .map_err(|e| FetchError::Transport(format!("invalid remote url {}: {}", base, e)))?;
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  base
    .join(list_path.trim_start_matches('/'))
    .map_err(|e| FetchError::Transport(format!("invalid list path {}: {}", list_path, e)))
}
