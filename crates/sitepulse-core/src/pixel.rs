//! Third-party measurement pixel forwarding.
//!
//! A composite identifier bundling visitor, site, referrer and cleaned page
//! URL is base64-encoded and attached to the pixel URL, which the host loads
//! as a remote script resource exactly once per page load.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::host::ScriptLoader;

/// The decoded form of the composite identifier. Key names are part of the
/// pixel contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeContext {
    /// Visitor token.
    pub v: String,
    /// Site identifier.
    pub s: String,
    /// Referrer, or the literal `"direct"`.
    pub r: String,
    /// Current page URL with query and fragment stripped.
    pub p: String,
}

/// Build the composite identifier: `base64(JSON({v, s, r, p}))`.
pub fn composite_id(
    visitor_id: &str,
    site_id: &str,
    referrer: Option<&str>,
    page_url: &str,
) -> Result<String> {
    let context = CompositeContext {
        v: visitor_id.to_string(),
        s: site_id.to_string(),
        r: referrer
            .filter(|r| !r.is_empty())
            .unwrap_or("direct")
            .to_string(),
        p: clean_url(page_url),
    };
    Ok(STANDARD.encode(serde_json::to_string(&context)?))
}

/// Strip query and fragment from a URL. Unparseable input is returned as-is.
#[must_use]
pub fn clean_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// Build the pixel URL carrying the program id and composite identifier.
pub fn pixel_url(base: &str, program_id: &str, composite: &str) -> Result<String> {
    let mut url =
        Url::parse(base).map_err(|e| Error::Config(format!("invalid pixel url: {e}")))?;
    url.query_pairs_mut()
        .append_pair("pid", program_id)
        .append_pair("puid", composite);
    Ok(url.to_string())
}

/// Dispatch the pixel through the injected loader. Failures are logged and
/// swallowed; the pixel is never worth breaking the page over.
pub fn forward(
    loader: &dyn ScriptLoader,
    base: &str,
    program_id: &str,
    visitor_id: &str,
    site_id: &str,
    referrer: Option<&str>,
    page_url: &str,
) {
    let composite = match composite_id(visitor_id, site_id, referrer, page_url) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to build composite identifier");
            return;
        }
    };
    match pixel_url(base, program_id, &composite) {
        Ok(url) => loader.load(&url),
        Err(e) => warn!(error = %e, "failed to build pixel url"),
    }
}
