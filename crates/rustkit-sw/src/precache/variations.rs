//! Alternative spellings of a request URL tried against the manifest.

use std::sync::Arc;

use regex::Regex;
use url::Url;

/// Extra candidate URLs derived from the request URL.
pub type UrlManipulation = Arc<dyn Fn(&Url) -> Vec<Url> + Send + Sync>;

/// How the precache route maps incoming URLs onto manifest URLs.
#[derive(Clone)]
pub struct PrecacheRouteOptions {
    /// Query parameters whose names match any of these are dropped.
    pub ignore_url_parameters_matching: Vec<Regex>,
    /// Appended to URLs ending in `/`.
    pub directory_index: Option<String>,
    /// Also try the path with `.html` appended.
    pub clean_urls: bool,
    pub url_manipulation: Option<UrlManipulation>,
}

impl PrecacheRouteOptions {
    pub fn new(ignore_url_parameters_matching: Vec<Regex>) -> Self {
        Self {
            ignore_url_parameters_matching,
            directory_index: Some("index.html".to_string()),
            clean_urls: true,
            url_manipulation: None,
        }
    }
}

impl Default for PrecacheRouteOptions {
    fn default() -> Self {
        let utm = Regex::new("^utm_").map(|re| vec![re]).unwrap_or_default();
        Self::new(utm)
    }
}

impl std::fmt::Debug for PrecacheRouteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecacheRouteOptions")
            .field(
                "ignore_url_parameters_matching",
                &self.ignore_url_parameters_matching,
            )
            .field("directory_index", &self.directory_index)
            .field("clean_urls", &self.clean_urls)
            .field("url_manipulation", &self.url_manipulation.is_some())
            .finish()
    }
}

/// Drop every query parameter whose name matches one of `patterns`.
pub fn remove_ignored_search_params(url: &mut Url, patterns: &[Regex]) {
    if url.query().is_none() || patterns.is_empty() {
        return;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| !patterns.iter().any(|re| re.is_match(name)))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

/// Candidate URLs for `url`, most specific first.
///
/// 1. the URL without its fragment
/// 2. with ignored query parameters removed
/// 3. with the directory index appended, for paths ending in `/`
/// 4. with `.html` appended (clean URLs)
/// 5. whatever `url_manipulation` returns
pub fn generate_url_variations(url: &Url, options: &PrecacheRouteOptions) -> Vec<Url> {
    let mut variations = Vec::with_capacity(5);

    let mut base = url.clone();
    base.set_fragment(None);
    variations.push(base.clone());

    // The stripped URL is also what url_manipulation sees.
    remove_ignored_search_params(&mut base, &options.ignore_url_parameters_matching);
    variations.push(base.clone());

    if let Some(index) = options.directory_index.as_deref() {
        if base.path().ends_with('/') {
            let mut directory = base.clone();
            directory.set_path(&format!("{}{}", base.path(), index));
            variations.push(directory);
        }
    }

    if options.clean_urls {
        let mut clean = base.clone();
        clean.set_path(&format!("{}.html", base.path()));
        variations.push(clean);
    }

    if let Some(manipulate) = &options.url_manipulation {
        variations.extend(manipulate(&base));
    }

    variations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn strings(urls: Vec<Url>) -> Vec<String> {
        urls.into_iter().map(String::from).collect()
    }

    #[test]
    fn test_default_variations_for_directory() {
        let variations = generate_url_variations(
            &url("https://example.com/docs/?utm_source=x#top"),
            &PrecacheRouteOptions::default(),
        );
        assert_eq!(
            strings(variations),
            vec![
                "https://example.com/docs/?utm_source=x",
                "https://example.com/docs/",
                "https://example.com/docs/index.html",
                "https://example.com/docs/.html",
            ]
        );
    }

    #[test]
    fn test_only_matching_params_removed() {
        let mut u = url("https://example.com/a?utm_medium=m&id=7&utm_campaign=c");
        remove_ignored_search_params(&mut u, &PrecacheRouteOptions::default().ignore_url_parameters_matching);
        assert_eq!(u.as_str(), "https://example.com/a?id=7");
    }

    #[test]
    fn test_clean_url_and_manipulation() {
        let options = PrecacheRouteOptions {
            directory_index: None,
            url_manipulation: Some(Arc::new(|u: &Url| {
                let mut alt = u.clone();
                alt.set_path("/fallback.html");
                vec![alt]
            })),
            ..Default::default()
        };
        let variations = strings(generate_url_variations(&url("https://example.com/about"), &options));
        assert_eq!(
            variations,
            vec![
                "https://example.com/about",
                "https://example.com/about",
                "https://example.com/about.html",
                "https://example.com/fallback.html",
            ]
        );
    }
}
