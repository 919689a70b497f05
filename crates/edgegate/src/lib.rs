pub use edgegate_core::prelude::*;

pub mod app;
pub mod cache;
pub mod config;
pub mod ext;
pub mod http;
pub mod process;
pub mod proxy;
pub mod reload;
pub mod tls;
pub mod types;

use arc_swap::ArcSwap;

pub use crate::config::Config;

/// Shared inputs for the request path. Constructed once in [`app::run`] and
/// passed by `Arc` to every listener; nothing in here is a process-global.
pub struct ProxyInputs {
	pub cfg: Arc<Config>,
	/// Swapped atomically on config reload; in-flight requests keep the
	/// snapshot they started with.
	pub routes: ArcSwap<types::route::RouteTable>,
	pub certs: Arc<tls::CertStore>,
	pub sessions: Arc<http::session::SessionStore>,
	pub cache: Arc<cache::ResponseCache>,
	pub upstream: reqwest::Client,
	pub geo: Arc<dyn ext::GeoLookup>,
	pub pdf: Arc<dyn ext::PdfConverter>,
	pub stats: Arc<dyn ext::Stats>,
}

pub(crate) fn is_default<T: Default + PartialEq>(t: &T) -> bool {
	*t == T::default()
}

pub(crate) fn default_true() -> bool {
	true
}
