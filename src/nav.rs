//! Navigation items: the mapping from a nav name to a REST resource and a store.

use serde::Deserialize;

/// Which caching strategy backs a navigation item.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StoreMode {
  /// Per-request cache keyed by the computed path.
  #[default]
  Session,
  /// Whole collection refreshed incrementally via a last-update watermark.
  WholeLastUpdated,
}

/// One logical collection exposed by the API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NavigationItem {
  pub name: String,
  /// Alternative names that resolve to this item
  #[serde(default)]
  pub aliases: Vec<String>,
  /// Absolute URL, or a path relative to the API base URL. Defaults to the name.
  pub path: Option<String>,
  #[serde(default)]
  pub store: StoreMode,
  /// Back the store with the persisted local cache
  #[serde(default)]
  pub local_cache: bool,
  /// Overrides the store's default freshness window
  pub expiry_hours: Option<i64>,
}

impl NavigationItem {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      aliases: Vec::new(),
      path: None,
      store: StoreMode::default(),
      local_cache: false,
      expiry_hours: None,
    }
  }

  pub fn with_path(mut self, path: impl Into<String>) -> Self {
    self.path = Some(path.into());
    self
  }

  pub fn with_store(mut self, store: StoreMode) -> Self {
    self.store = store;
    self
  }

  pub fn with_local_cache(mut self, local_cache: bool) -> Self {
    self.local_cache = local_cache;
    self
  }

  pub fn with_expiry_hours(mut self, hours: i64) -> Self {
    self.expiry_hours = Some(hours);
    self
  }

  fn matches(&self, name: &str) -> bool {
    self.name.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
  }

  fn raw_path(&self) -> &str {
    self.path.as_deref().unwrap_or(&self.name)
  }
}

/// Either a nav name to look up, or an item supplied inline.
#[derive(Debug, Clone, PartialEq)]
pub enum NavRef {
  Name(String),
  Item(NavigationItem),
}

impl NavRef {
  /// The name used for store lookup and cache keys.
  pub fn name(&self) -> &str {
    match self {
      NavRef::Name(name) => name,
      NavRef::Item(item) => &item.name,
    }
  }
}

impl From<&str> for NavRef {
  fn from(name: &str) -> Self {
    NavRef::Name(name.to_string())
  }
}

impl From<String> for NavRef {
  fn from(name: String) -> Self {
    NavRef::Name(name)
  }
}

impl From<NavigationItem> for NavRef {
  fn from(item: NavigationItem) -> Self {
    NavRef::Item(item)
  }
}

/// Registry of navigation items plus the API base URL they hang off.
#[derive(Debug, Clone, Default)]
pub struct Navigation {
  base_url: String,
  items: Vec<NavigationItem>,
}

impl Navigation {
  pub fn new(base_url: impl Into<String>, items: Vec<NavigationItem>) -> Self {
    Self {
      base_url: base_url.into().trim_end_matches('/').to_string(),
      items,
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub fn items(&self) -> &[NavigationItem] {
    &self.items
  }

  /// Resolve a nav reference to its item. Inline items resolve to themselves.
  pub fn resolve<'a>(&'a self, nav: &'a NavRef) -> Option<&'a NavigationItem> {
    match nav {
      NavRef::Item(item) => Some(item),
      NavRef::Name(name) => self.items.iter().find(|item| item.matches(name)),
    }
  }

  /// Absolute URL for a nav reference.
  ///
  /// Unknown names fall back to treating the name itself as a relative path.
  pub fn find_path(&self, nav: &NavRef) -> String {
    let raw = match self.resolve(nav) {
      Some(item) => item.raw_path(),
      None => nav.name(),
    };
    self.absolute(raw)
  }

  /// Join a relative path onto the base URL; absolute URLs pass through.
  pub fn absolute(&self, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") || self.base_url.is_empty() {
      return path.to_string();
    }
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  /// Strip the base URL from a computed URL, for use in cache keys.
  pub fn relative<'a>(&self, url: &'a str) -> &'a str {
    if self.base_url.is_empty() {
      return url;
    }
    url
      .strip_prefix(self.base_url.as_str())
      .map(|rest| rest.trim_start_matches('/'))
      .unwrap_or(url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn navigation() -> Navigation {
    Navigation::new(
      "https://api.example.com/",
      vec![
        NavigationItem {
          aliases: vec!["vehicles".to_string()],
          ..NavigationItem::new("cars").with_path("v1/cars")
        },
        NavigationItem::new("users").with_path("https://auth.example.com/users"),
      ],
    )
  }

  #[test]
  fn test_find_path_by_name_and_alias() {
    let nav = navigation();
    assert_eq!(nav.find_path(&"cars".into()), "https://api.example.com/v1/cars");
    assert_eq!(nav.find_path(&"Vehicles".into()), "https://api.example.com/v1/cars");
  }

  #[test]
  fn test_absolute_paths_pass_through() {
    let nav = navigation();
    assert_eq!(nav.find_path(&"users".into()), "https://auth.example.com/users");
  }

  #[test]
  fn test_unknown_name_falls_back_to_name() {
    let nav = navigation();
    assert_eq!(nav.find_path(&"trucks".into()), "https://api.example.com/trucks");
  }

  #[test]
  fn test_inline_item_resolves_to_itself() {
    let nav = navigation();
    let item = NavigationItem::new("boats").with_store(StoreMode::WholeLastUpdated);
    let nav_ref = NavRef::from(item.clone());
    assert_eq!(nav.resolve(&nav_ref), Some(&item));
    assert_eq!(nav.find_path(&nav_ref), "https://api.example.com/boats");
  }

  #[test]
  fn test_relative_strips_base() {
    let nav = navigation();
    assert_eq!(nav.relative("https://api.example.com/v1/cars/2"), "v1/cars/2");
    assert_eq!(nav.relative("https://other.example.com/x"), "https://other.example.com/x");
  }
}
