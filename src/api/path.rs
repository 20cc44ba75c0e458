//! Request descriptions and URL construction.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::nav::{NavRef, Navigation};

/// Filter, sort and paging parameters recognized by the API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
  pub filter_by: Option<String>,
  pub include_count: Option<bool>,
  pub include_details: Option<bool>,
  pub include_inactive: Option<bool>,
  pub properties: Option<String>,
  pub query: Option<String>,
  pub search_string: Option<String>,
  pub sort_order: Option<String>,
  pub sort_by: Option<String>,
  pub take_from: Option<u64>,
  pub take_amount: Option<u64>,
  /// Passed through verbatim after the recognized parameters
  pub other: BTreeMap<String, String>,
}

impl QueryParams {
  /// Encode as a query string (no leading `?`), in a fixed parameter order.
  pub fn to_query_string(&self) -> String {
    fn flag(b: &Option<bool>) -> Option<String> {
      b.map(|b| b.to_string())
    }
    fn num(n: &Option<u64>) -> Option<String> {
      n.map(|n| n.to_string())
    }

    let recognized = [
      ("filterBy", self.filter_by.clone()),
      ("includeCount", flag(&self.include_count)),
      ("includeDetails", flag(&self.include_details)),
      ("includeInactive", flag(&self.include_inactive)),
      ("properties", self.properties.clone()),
      ("query", self.query.clone()),
      ("searchString", self.search_string.clone()),
      ("sortOrder", self.sort_order.clone()),
      ("sortBy", self.sort_by.clone()),
      ("takeFrom", num(&self.take_from)),
      ("takeAmount", num(&self.take_amount)),
    ];

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in recognized.iter() {
      if let Some(value) = value {
        serializer.append_pair(key, value);
      }
    }
    for (key, value) in &self.other {
      serializer.append_pair(key, value);
    }
    serializer.finish()
  }
}

/// Everything needed to describe one request.
///
/// Built once per call. The computed URL is cached in `final_url` the first time
/// it is asked for, so later layers reuse it.
#[derive(Debug, Clone, PartialEq)]
pub struct PathOptions {
  pub nav: Option<NavRef>,
  pub url: Option<String>,
  pub additional_url: Option<String>,
  pub id: Option<String>,
  pub data: Option<Value>,
  pub params: QueryParams,
  pub headers: BTreeMap<String, String>,
  pub proxy_id: Option<String>,
  pub return_json: bool,
  pub return_text: bool,
  /// Bypass in-memory and local caches
  pub refresh: bool,
  /// When false, GET failures other than 401 resolve to `None`
  pub throw_error: bool,
  /// Overrides the nav name as the store key prefix
  pub store_name: Option<String>,
  pub final_url: Option<String>,
}

impl Default for PathOptions {
  fn default() -> Self {
    Self {
      nav: None,
      url: None,
      additional_url: None,
      id: None,
      data: None,
      params: QueryParams::default(),
      headers: BTreeMap::new(),
      proxy_id: None,
      return_json: true,
      return_text: false,
      refresh: false,
      throw_error: true,
      store_name: None,
      final_url: None,
    }
  }
}

impl PathOptions {
  pub fn new(nav: impl Into<NavRef>) -> Self {
    Self {
      nav: Some(nav.into()),
      ..Self::default()
    }
  }

  pub fn for_url(url: impl Into<String>) -> Self {
    Self {
      url: Some(url.into()),
      ..Self::default()
    }
  }

  pub fn with_id(mut self, id: impl ToString) -> Self {
    self.id = Some(id.to_string());
    self
  }

  pub fn with_data(mut self, data: Value) -> Self {
    self.data = Some(data);
    self
  }

  pub fn with_params(mut self, params: QueryParams) -> Self {
    self.params = params;
    self
  }

  pub fn with_additional_url(mut self, additional_url: impl Into<String>) -> Self {
    self.additional_url = Some(additional_url.into());
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn with_proxy_id(mut self, proxy_id: impl Into<String>) -> Self {
    self.proxy_id = Some(proxy_id.into());
    self
  }

  pub fn with_refresh(mut self, refresh: bool) -> Self {
    self.refresh = refresh;
    self
  }

  pub fn with_throw_error(mut self, throw_error: bool) -> Self {
    self.throw_error = throw_error;
    self
  }

  pub fn with_return_text(mut self) -> Self {
    self.return_text = true;
    self.return_json = false;
    self
  }

  /// Cache under a store of this name instead of the nav's own.
  pub fn with_store_name(mut self, store_name: impl Into<String>) -> Self {
    self.store_name = Some(store_name.into());
    self
  }

  /// `url` (or the nav's path) joined with `additional_url`, without id or query.
  pub fn base_path(&self, navigation: &Navigation) -> String {
    let base = match (&self.url, &self.nav) {
      (Some(url), _) => navigation.absolute(url),
      (None, Some(nav)) => navigation.find_path(nav),
      (None, None) => navigation.base_url().to_string(),
    };
    let mut path = base.trim_end_matches('/').to_string();
    if let Some(extra) = self.additional_url.as_deref().map(|a| a.trim_matches('/')) {
      if !extra.is_empty() {
        path.push('/');
        path.push_str(extra);
      }
    }
    path
  }

  /// Compute (once) and return the full request URL.
  pub fn build_url(&mut self, navigation: &Navigation) -> String {
    if let Some(url) = &self.final_url {
      return url.clone();
    }

    let mut url = self.base_path(navigation);
    if let Some(id) = &self.id {
      if url.contains("{id}") {
        url = url.replace("{id}", id);
      } else {
        url.push('/');
        url.push_str(id);
      }
    }

    let query = self.params.to_query_string();
    if !query.is_empty() {
      url.push('?');
      url.push_str(&query);
    }

    self.final_url = Some(url.clone());
    url
  }
}
