//! Maps a Hit to a site identifier. Two strategies share one interface
//! (SPEC_FULL.md §4.4).

use crate::error::Fatal;
use crate::hit::Hit;
use crate::http_client::{HttpClient, HttpError};
use std::collections::HashMap;
use std::sync::Mutex;

fn fatal_without_hit(e: HttpError) -> Fatal {
    Fatal::new(e.to_string())
}

fn fatal_with_hit(e: HttpError, hit: &Hit) -> Fatal {
    Fatal::new(e.to_string()).with_context(hit.filename.clone(), hit.lineno)
}

/// Sentinel used both as the cache key for hits with no host, and as the hostname
/// recorded into the ignored-hostname set when dynamic resolution misses
/// (SPEC_FULL.md §4.4).
pub const NO_HOSTNAME_SENTINEL: &str = "no-hostname-found-in-log";

pub struct ResolvedSite {
    pub site_id: String,
    pub main_url: Option<String>,
}

/// Shared strategy interface: `resolve(hit) -> (site_id, main_url)`, both optional.
pub enum Resolver {
    Static(StaticResolver),
    Dynamic(DynamicResolver),
}

impl Resolver {
    pub fn resolve(&self, hit: &Hit, client: &HttpClient) -> Result<Option<ResolvedSite>, Fatal> {
        match self {
            Resolver::Static(r) => r.resolve(hit),
            Resolver::Dynamic(r) => r.resolve(hit, client),
        }
    }

    /// Startup validation: the chosen format must expose a `host` field (or an
    /// override hostname must be configured) unless static resolution or replay mode
    /// is in effect (SPEC_FULL.md §4.4).
    pub fn validate_host_requirement(
        format_has_host_field: bool,
        log_hostname_override: Option<&str>,
        replay_tracking: bool,
    ) -> Result<(), Fatal> {
        if replay_tracking || format_has_host_field || log_hostname_override.is_some() {
            return Ok(());
        }
        Err(Fatal::new(
            "the selected log format has no host field and no --log-hostname override was given; dynamic resolution requires one of the two",
        ))
    }
}

/// Resolves every hit to the same, pre-fetched site id.
pub struct StaticResolver {
    site_id: String,
    main_url: Option<String>,
}

impl StaticResolver {
    /// Fetch the site's main URL once at startup. Skipped in replay mode, since the URL
    /// is reconstructed from the parsed query string instead, and in a dry run, since no
    /// request will ever be built from it.
    pub fn new(site_id: String, client: &HttpClient, skip_fetch: bool) -> Result<Self, Fatal> {
        let main_url = if skip_fetch {
            None
        } else {
            client.fetch_site_main_url(&site_id).map_err(fatal_without_hit)?
        };
        Ok(Self { site_id, main_url })
    }

    fn resolve(&self, _hit: &Hit) -> Result<Option<ResolvedSite>, Fatal> {
        Ok(Some(ResolvedSite {
            site_id: self.site_id.clone(),
            main_url: self.main_url.clone(),
        }))
    }
}

/// Resolves each hit's host to a site id via a host->site cache, backed by an API
/// lookup on cache miss. `None` is cached for unknown hosts to avoid repeat calls.
pub struct DynamicResolver {
    cache: Mutex<HashMap<String, Option<ResolvedSiteCacheEntry>>>,
    replay_tracking: bool,
}

#[derive(Clone)]
struct ResolvedSiteCacheEntry {
    site_id: String,
    main_url: Option<String>,
}

impl DynamicResolver {
    pub fn new(replay_tracking: bool) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            replay_tracking,
        }
    }

    fn resolve(&self, hit: &Hit, client: &HttpClient) -> Result<Option<ResolvedSite>, Fatal> {
        if self.replay_tracking {
            return Ok(hit.args.get("idsite").map(|id| ResolvedSite {
                site_id: id.clone(),
                main_url: None,
            }));
        }

        let host = hit
            .host
            .clone()
            .unwrap_or_else(|| NO_HOSTNAME_SENTINEL.to_string());

        if let Some(cached) = self.cache.lock().unwrap().get(&host).cloned() {
            return Ok(cached.map(|e| ResolvedSite {
                site_id: e.site_id,
                main_url: e.main_url,
            }));
        }

        let looked_up = client
            .resolve_site_for_host(&host)
            .map_err(|e| fatal_with_hit(e, hit))?;
        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            host.clone(),
            looked_up.as_ref().map(|r| ResolvedSiteCacheEntry {
                site_id: r.site_id.clone(),
                main_url: r.main_url.clone(),
            }),
        );
        Ok(looked_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpClientConfig;

    #[test]
    fn validate_host_requirement_passes_in_replay_mode() {
        assert!(Resolver::validate_host_requirement(false, None, true).is_ok());
    }

    #[test]
    fn validate_host_requirement_passes_with_override() {
        assert!(Resolver::validate_host_requirement(false, Some("example.com"), false).is_ok());
    }

    #[test]
    fn validate_host_requirement_fails_without_host_field() {
        assert!(Resolver::validate_host_requirement(false, None, false).is_err());
    }

    fn client_for_test() -> HttpClient {
        HttpClient::new(HttpClientConfig {
            piwik_url: "example.com".to_string(),
            piwik_api_url: None,
            tracker_endpoint_path: "/ppms.php".to_string(),
            auth_user: None,
            auth_password: None,
            client_id: None,
            client_secret: None,
            max_attempts: 1,
            delay_after_failure: std::time::Duration::from_millis(1),
            request_timeout: std::time::Duration::from_secs(5),
            accept_invalid_ssl_certificate: false,
            verbosity: 0,
        })
        .expect("client construction does not touch the network")
    }

    #[test]
    fn dynamic_resolver_uses_idsite_arg_in_replay_mode() {
        let resolver = DynamicResolver::new(true);
        let mut hit = Hit::new(None, 1);
        hit.args.insert("idsite".to_string(), "3".to_string());
        let client = client_for_test();

        // Replay-mode resolution reads `idsite` straight off the hit; it never
        // touches the HTTP client or the host->site cache.
        let resolved = resolver
            .resolve(&hit, &client)
            .expect("replay-mode resolution cannot fail")
            .expect("idsite was present on the hit");
        assert_eq!(resolved.site_id, "3");
        assert!(resolved.main_url.is_none());
    }

    #[test]
    fn dynamic_resolver_misses_in_replay_mode_without_idsite_arg() {
        let resolver = DynamicResolver::new(true);
        let hit = Hit::new(None, 1);
        let client = client_for_test();

        let resolved = resolver.resolve(&hit, &client).expect("replay-mode resolution cannot fail");
        assert!(resolved.is_none());
    }
}
