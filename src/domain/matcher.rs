use crate::domain::models::{BlockDecision, BlockedDomain, BlockingSnapshot};
use crate::domain::session_clock;
use chrono::{DateTime, Utc};
use url::Url;

/// Lowercases and trims a hostname and drops one leading `www.` so that
/// `www.Facebook.com` and `facebook.com` compare equal.
pub fn normalize_hostname(raw: &str) -> String {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized
        .strip_prefix("www.")
        .map(ToOwned::to_owned)
        .unwrap_or(normalized)
}

/// Exact or subdomain match between a candidate hostname and one blocklist
/// entry. The suffix check requires a dot boundary, so `notfacebook.com`
/// never matches `facebook.com`.
pub fn matches(candidate_hostname: &str, blocked_domain: &str) -> bool {
    let candidate = normalize_hostname(candidate_hostname);
    let blocked = normalize_hostname(blocked_domain);
    if candidate.is_empty() || blocked.is_empty() {
        return false;
    }
    candidate == blocked || candidate.ends_with(&format!(".{blocked}"))
}

/// Returns the first blocklist entry matching the hostname, in list order
/// (the server's insertion order). Any match blocks, so no further tie-break
/// is needed.
pub fn is_any_blocked<'a>(
    candidate_hostname: &str,
    blocked_domains: &'a [BlockedDomain],
) -> Option<&'a BlockedDomain> {
    if candidate_hostname.trim().is_empty() {
        return None;
    }
    blocked_domains
        .iter()
        .find(|entry| matches(candidate_hostname, &entry.domain))
}

/// Evaluates a candidate URL against the snapshot. Fails open: an
/// unparseable URL or one without a hostname is never blocked, since
/// redirecting on a broken internal URL would trap the user inside the host
/// application.
pub fn compute_block_decision(
    snapshot: &BlockingSnapshot,
    candidate_url: &str,
    now: DateTime<Utc>,
) -> BlockDecision {
    let Some(session) = snapshot.active_session.as_ref() else {
        return BlockDecision::allow();
    };
    if !session_clock::is_active(session, now, snapshot.session_duration_ms) {
        return BlockDecision::allow();
    }

    let Ok(parsed) = Url::parse(candidate_url) else {
        return BlockDecision::allow();
    };
    let Some(hostname) = parsed.host_str() else {
        return BlockDecision::allow();
    };

    match is_any_blocked(hostname, &snapshot.blocked_domains) {
        Some(entry) => BlockDecision {
            is_blocked: true,
            matched_domain: Some(normalize_hostname(&entry.domain)),
            time_remaining_ms: session_clock::remaining_ms(
                session,
                now,
                snapshot.session_duration_ms,
            ),
        },
        None => BlockDecision::allow(),
    }
}
