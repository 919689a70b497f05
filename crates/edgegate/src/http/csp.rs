use ::http::HeaderValue;

use crate::http::HeaderMap;

/// Content-Security-Policy attachment. A route-level policy overrides the
/// global one; the planner runs in the middleware chain but the header lands
/// on the final response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Csp {
	pub policy: String,
	#[serde(default)]
	pub report_only: bool,
}

impl Csp {
	pub fn apply(&self, headers: &mut HeaderMap) {
		let name = if self.report_only {
			"content-security-policy-report-only"
		} else {
			"content-security-policy"
		};
		if let Ok(value) = HeaderValue::from_str(&self.policy) {
			headers.insert(name, value);
		}
	}
}

/// Resolve the effective policy: route CSP wins over the global CSP.
pub fn effective<'a>(route: Option<&'a Csp>, global: Option<&'a Csp>) -> Option<&'a Csp> {
	route.or(global)
}
