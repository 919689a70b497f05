use super::*;

fn geo(country: &str) -> GeoInfo {
	GeoInfo {
		country: Some(country.to_string()),
		..Default::default()
	}
}

fn filter(mode: GeoMode, countries: Vec<&str>) -> GeoFilter {
	GeoFilter::try_from(GeoFilterSerde {
		mode,
		countries: countries.into_iter().map(String::from).collect(),
		regions: vec![],
		cities: vec![],
		blocked_status: None,
		redirect_url: None,
	})
	.unwrap()
}

#[test]
fn allow_blocks_outside_set() {
	let f = filter(GeoMode::Allow, vec!["US"]);
	assert!(!f.blocks(Some(&geo("US"))));
	assert!(f.blocks(Some(&geo("DE"))));
}

#[test]
fn block_blocks_inside_set() {
	let f = filter(GeoMode::Block, vec!["DE"]);
	assert!(f.blocks(Some(&geo("DE"))));
	assert!(!f.blocks(Some(&geo("US"))));
}

/// With identical inputs, `allow` over S behaves like `block` over the
/// complement of S.
#[test]
fn allow_block_duality() {
	let universe = ["US", "DE", "FR", "JP"];
	let set = vec!["US", "FR"];
	let complement: Vec<&str> = universe
		.iter()
		.filter(|c| !set.contains(c))
		.copied()
		.collect();

	let allow = filter(GeoMode::Allow, set);
	let block = filter(GeoMode::Block, complement);
	for country in universe {
		let g = geo(country);
		assert_eq!(
			allow.blocks(Some(&g)),
			block.blocks(Some(&g)),
			"country {country}"
		);
	}
}

#[test]
fn missing_geo_passes() {
	// Lookup is best-effort; absent data never blocks.
	assert!(!filter(GeoMode::Allow, vec!["US"]).blocks(None));
	assert!(!filter(GeoMode::Block, vec!["US"]).blocks(None));
}

#[test]
fn matching_is_case_insensitive() {
	let f = filter(GeoMode::Block, vec!["de"]);
	assert!(f.blocks(Some(&geo("DE"))));
}

#[test]
fn deny_redirect() {
	let f = GeoFilter::try_from(GeoFilterSerde {
		mode: GeoMode::Block,
		countries: vec!["DE".into()],
		regions: vec![],
		cities: vec![],
		blocked_status: None,
		redirect_url: Some("https://blocked.test".into()),
	})
	.unwrap();
	let resp = f.deny_response();
	assert_eq!(resp.status(), StatusCode::FOUND);
	assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "https://blocked.test");
}

#[test]
fn deny_status_configurable() {
	let f = GeoFilter::try_from(GeoFilterSerde {
		mode: GeoMode::Block,
		countries: vec!["DE".into()],
		regions: vec![],
		cities: vec![],
		blocked_status: Some(451),
		redirect_url: None,
	})
	.unwrap();
	assert_eq!(f.deny_response().status().as_u16(), 451);
}
