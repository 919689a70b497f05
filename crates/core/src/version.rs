use std::fmt;

#[derive(Clone, Debug)]
pub struct BuildInfo {
	pub version: &'static str,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: env!("CARGO_PKG_VERSION"),
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BuildInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "edgegate version {}", self.version)
	}
}
