use std::collections::BTreeSet;

use crate::contract::{HttpMethod, RouteSpec};

/// Full HTTP contract of the service. The router in `server` attaches one
/// handler per entry; an entry without a handler fails router construction.
pub const CONTRACT_ROUTES: &[(HttpMethod, &str)] = &[
    (HttpMethod::Get, "/health"),
    (HttpMethod::Post, "/api/generate"),
    (HttpMethod::Get, "/api/runs"),
    (HttpMethod::Post, "/api/runs/{runId}/cancel"),
    (HttpMethod::Get, "/api/history"),
    (HttpMethod::Get, "/api/models"),
    (HttpMethod::Get, "/api/loras"),
    (HttpMethod::Post, "/api/loras"),
    (HttpMethod::Get, "/api/catalog/presets"),
    (HttpMethod::Get, "/api/catalog/templates"),
    (HttpMethod::Get, "/api/catalog/templates/{templateId}/apply"),
    (HttpMethod::Get, "/api/catalog/styles"),
    (HttpMethod::Get, "/api/catalog/prompts"),
    (HttpMethod::Post, "/api/enhance"),
    (HttpMethod::Get, "/api/outputs/{filename}"),
];

pub fn route_catalog() -> Vec<RouteSpec> {
    let mut out = Vec::with_capacity(CONTRACT_ROUTES.len());
    let mut seen = BTreeSet::new();

    for (method, path) in CONTRACT_ROUTES {
        let spec = RouteSpec::new(*method, *path).expect("contract routes must be valid");
        assert!(
            seen.insert(spec.clone()),
            "duplicate route in contract list: {spec}"
        );
        out.push(spec);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_route_count_is_stable() {
        assert_eq!(CONTRACT_ROUTES.len(), 15);
        assert_eq!(route_catalog().len(), 15);
    }

    #[test]
    fn every_route_lives_under_the_api_prefix_except_health() {
        for spec in route_catalog() {
            assert!(
                spec.path == "/health" || spec.path.starts_with("/api/"),
                "unexpected route prefix: {spec}"
            );
        }
    }
}
