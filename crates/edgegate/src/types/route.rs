use std::collections::HashMap;

use anyhow::{anyhow, bail};
use regex::Regex;
use url::Url;

use crate::http::cors::{Cors, CorsSerde};
use crate::http::csp::Csp;
use crate::http::geo::{GeoFilter, GeoFilterSerde};
use crate::http::oauth2::{OAuth2, OAuth2Serde};
use crate::http::{HeaderName, HeaderValue};
use crate::proxy::websocket::{WebsocketPolicy, WebsocketSerde};
use crate::*;

#[cfg(test)]
#[path = "route_test.rs"]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteKind {
	Proxy,
	CorsForwarder,
	Static,
	Redirect,
}

impl RouteKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			RouteKind::Proxy => "proxy",
			RouteKind::CorsForwarder => "cors-forwarder",
			RouteKind::Static => "static",
			RouteKind::Redirect => "redirect",
		}
	}
}

/// A compiled route. Immutable within a config snapshot; shared into requests
/// as `Arc<Route>`.
#[derive(Debug)]
pub struct Route {
	pub name: String,
	pub host: String,
	/// Empty prefix matches every path.
	pub path_prefix: String,
	pub kind: RouteKind,
	pub upstream: Option<Url>,
	pub static_root: Option<PathBuf>,
	pub redirect_to: Option<String>,
	/// Ordered; the first matching pattern wins.
	pub rewrite_rules: Vec<(Regex, String)>,
	/// Ordered; every rule is applied globally to eligible response bodies.
	pub replace_rules: Vec<(Regex, String)>,
	pub header_overlay: Vec<(HeaderName, HeaderValue)>,
	pub cors: Option<Cors>,
	pub oauth2: Option<OAuth2>,
	pub websocket: Option<WebsocketPolicy>,
	pub geo_filter: Option<GeoFilter>,
	pub csp: Option<Csp>,
	pub spa_fallback: bool,
	pub public_paths: Vec<String>,
	pub ssl: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RewriteRule {
	pub pattern: String,
	pub replacement: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteSerde {
	pub name: String,
	pub host: String,
	#[serde(default)]
	pub path_prefix: Option<String>,
	pub kind: RouteKind,
	#[serde(default)]
	pub upstream: Option<String>,
	#[serde(default)]
	pub static_root: Option<PathBuf>,
	#[serde(default)]
	pub redirect_to: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub rewrite_rules: Vec<RewriteRule>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub replace_rules: Vec<RewriteRule>,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub headers: HashMap<String, String>,
	#[serde(default)]
	pub cors: Option<CorsSerde>,
	#[serde(default)]
	pub oauth2: Option<OAuth2Serde>,
	#[serde(default)]
	pub websocket: Option<WebsocketSerde>,
	#[serde(default)]
	pub geo_filter: Option<GeoFilterSerde>,
	#[serde(default)]
	pub csp: Option<Csp>,
	#[serde(default, skip_serializing_if = "is_default")]
	pub spa_fallback: bool,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub public_paths: Vec<String>,
	#[serde(default, skip_serializing_if = "is_default")]
	pub ssl: bool,
}

impl TryFrom<RouteSerde> for Route {
	type Error = anyhow::Error;

	fn try_from(raw: RouteSerde) -> Result<Self, Self::Error> {
		let name = raw.name;
		let host = raw.host;
		if host.is_empty() {
			bail!("route {name}: host must not be empty");
		}
		let upstream = raw
			.upstream
			.as_deref()
			.map(Url::parse)
			.transpose()
			.map_err(|e| anyhow!("route {name}: invalid upstream: {e}"))?;
		match raw.kind {
			RouteKind::Proxy if upstream.is_none() => {
				bail!("route {name}: proxy routes require an upstream")
			},
			RouteKind::Redirect if raw.redirect_to.as_deref().unwrap_or("").is_empty() => {
				bail!("route {name}: redirect routes require redirectTo")
			},
			RouteKind::Static if raw.static_root.is_none() => {
				bail!("route {name}: static routes require staticRoot")
			},
			_ => {},
		}

		// Invalid rewrite patterns are logged and skipped; an invalid replace
		// pattern is a config error since it silently corrupts bodies otherwise.
		let mut rewrite_rules = Vec::with_capacity(raw.rewrite_rules.len());
		for r in raw.rewrite_rules {
			match Regex::new(&r.pattern) {
				Ok(re) => rewrite_rules.push((re, r.replacement)),
				Err(e) => warn!(route = %name, pattern = %r.pattern, "skipping invalid rewrite pattern: {e}"),
			}
		}
		let replace_rules = raw
			.replace_rules
			.into_iter()
			.map(|r| {
				Regex::new(&r.pattern)
					.map(|re| (re, r.replacement))
					.map_err(|e| anyhow!("route {name}: invalid replace pattern {:?}: {e}", r.pattern))
			})
			.collect::<Result<Vec<_>, _>>()?;

		let header_overlay = raw
			.headers
			.into_iter()
			.map(|(k, v)| {
				Ok::<_, anyhow::Error>((
					HeaderName::from_bytes(k.as_bytes())
						.map_err(|e| anyhow!("route {name}: invalid header name {k:?}: {e}"))?,
					HeaderValue::from_str(&v)
						.map_err(|e| anyhow!("route {name}: invalid header value for {k:?}: {e}"))?,
				))
			})
			.collect::<Result<Vec<_>, _>>()?;

		Ok(Route {
			path_prefix: raw.path_prefix.unwrap_or_default(),
			kind: raw.kind,
			upstream,
			static_root: raw.static_root,
			redirect_to: raw.redirect_to,
			rewrite_rules,
			replace_rules,
			header_overlay,
			cors: raw.cors.map(Cors::try_from).transpose()?,
			oauth2: raw
				.oauth2
				.map(|o| OAuth2::compile(o, &name, &host, raw.ssl))
				.transpose()
				.map_err(|e| anyhow!("route {name}: {e}"))?,
			websocket: raw.websocket.map(WebsocketPolicy::from),
			geo_filter: raw.geo_filter.map(GeoFilter::try_from).transpose()?,
			csp: raw.csp,
			spa_fallback: raw.spa_fallback,
			public_paths: raw.public_paths,
			ssl: raw.ssl,
			host,
			name,
		})
	}
}

/// Compiled host/prefix matcher. Rebuilt (and atomically swapped) on every
/// config reload.
#[derive(Debug, Default)]
pub struct RouteTable {
	by_host: HashMap<String, Vec<Arc<Route>>>,
}

impl RouteTable {
	/// Build validates prefix uniqueness per host; among host-matching routes
	/// the longest prefix wins, so entries are kept sorted longest-first.
	pub fn build(routes: Vec<Route>) -> anyhow::Result<RouteTable> {
		let mut seen: HashMap<(String, String), String> = HashMap::new();
		let mut by_host: HashMap<String, Vec<Arc<Route>>> = HashMap::new();
		for route in routes {
			let key = (route.host.clone(), route.path_prefix.clone());
			if let Some(other) = seen.get(&key) {
				bail!(
					"routes {other:?} and {:?} share host {:?} and path prefix {:?}",
					route.name,
					route.host,
					route.path_prefix
				);
			}
			seen.insert(key, route.name.clone());
			let route = Arc::new(route);
			by_host
				.entry(route.host.clone())
				.or_default()
				.push(route.clone());
			by_host
				.entry(format!("www.{}", route.host))
				.or_default()
				.push(route);
		}
		for routes in by_host.values_mut() {
			routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
		}
		Ok(RouteTable { by_host })
	}

	/// Exact host match (`host` or `www.host`), then longest path prefix.
	/// Returns the matched route and the path with the prefix stripped.
	pub fn lookup<'p>(&self, host: &str, path: &'p str) -> Option<(Arc<Route>, &'p str)> {
		let candidates = self.by_host.get(host)?;
		let route = candidates
			.iter()
			.find(|r| path.starts_with(r.path_prefix.as_str()))?;
		let remainder = &path[route.path_prefix.len()..];
		Some((route.clone(), remainder))
	}

	pub fn is_empty(&self) -> bool {
		self.by_host.is_empty()
	}

	/// All distinct hosts with `ssl: true`, for certificate provisioning.
	pub fn ssl_hosts(&self) -> Vec<String> {
		let mut hosts: Vec<String> = self
			.by_host
			.values()
			.flatten()
			.filter(|r| r.ssl)
			.map(|r| r.host.clone())
			.collect();
		hosts.sort();
		hosts.dedup();
		hosts
	}
}
