use crate::RemoteError;
use saml2pkg_schema::{PkgVersion, PlatformConstraint, Release};
use serde::Deserialize;
use tracing::{debug, warn};

/// Published asset names look like `pfSense-2.7.2-pkg-saml2-auth.pkg`; the
/// middle part is the host platform version the build targets.
const ASSET_PREFIX: &str = "pfSense-";
const ASSET_SUFFIX: &str = "-pkg-saml2-auth.pkg";

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

/// Parse an untrusted registry document into release records.
///
/// The top level must be a JSON array. Elements carrying `tag_name` are read
/// as GitHub releases and expand into one record per platform asset; all
/// other elements must be plain [`Release`] records. Entries that do not
/// parse are dropped with a warning instead of failing the whole catalog.
pub fn parse_catalog(body: &[u8], include_prereleases: bool) -> Result<Vec<Release>, RemoteError> {
    let items: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| RemoteError::Malformed(e.to_string()))?;

    let mut releases = Vec::new();
    for item in items {
        if item.get("tag_name").is_some() {
            match serde_json::from_value::<GithubRelease>(item) {
                Ok(gh) => expand_github_release(gh, include_prereleases, &mut releases),
                Err(e) => warn!("skipping malformed release entry: {e}"),
            }
            continue;
        }
        match serde_json::from_value::<Release>(item) {
            Ok(release) => {
                if let Err(e) = release.constraint() {
                    warn!("skipping release {}: {e}", release.version);
                } else if release.version.is_prerelease() && !include_prereleases {
                    debug!("skipping prerelease {}", release.version);
                } else {
                    releases.push(release);
                }
            }
            Err(e) => warn!("skipping malformed release entry: {e}"),
        }
    }
    debug!("parsed {} release records", releases.len());
    Ok(releases)
}

fn expand_github_release(gh: GithubRelease, include_prereleases: bool, out: &mut Vec<Release>) {
    if gh.draft {
        debug!("skipping draft release {}", gh.tag_name);
        return;
    }
    let version = match PkgVersion::parse(&gh.tag_name) {
        Ok(v) => v,
        Err(e) => {
            warn!("skipping release with unparseable tag: {e}");
            return;
        }
    };
    if (gh.prerelease || version.is_prerelease()) && !include_prereleases {
        debug!("skipping prerelease {version}");
        return;
    }

    let release_date = gh
        .published_at
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    for asset in gh.assets {
        let Some(platform) = asset
            .name
            .strip_prefix(ASSET_PREFIX)
            .and_then(|rest| rest.strip_suffix(ASSET_SUFFIX))
        else {
            debug!("ignoring asset {} of {version}", asset.name);
            continue;
        };
        if let Err(e) = PlatformConstraint::parse(platform) {
            warn!("ignoring asset {} of {version}: {e}", asset.name);
            continue;
        }
        out.push(Release {
            version: version.clone(),
            release_date: release_date.clone(),
            platform_constraint: platform.to_owned(),
            artifact_url: asset.browser_download_url,
        });
    }
}
