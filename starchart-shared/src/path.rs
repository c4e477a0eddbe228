use percent_encoding::percent_decode_str;

use crate::api;

/// Percent-decoded segments following `/api/v1/households/`.
fn household_segments(path: &str) -> Option<Vec<String>> {
    let prefix = format!("{}/households/", api::API_V1_PREFIX);
    let rest = path.strip_prefix(&prefix)?;
    Some(
        rest.split('/')
            .map(|seg| percent_decode_str(seg).decode_utf8_lossy().to_string())
            .collect(),
    )
}

/// Extracts `{id}` from `/api/v1/households/{household}/profiles/{id}/...`
/// when `{household}` is `household_id`.
/// Returns a percent-decoded owned [`String`].
pub fn profile_id_from_path(path: &str, household_id: &str) -> Option<String> {
    let segs = household_segments(path)?;
    match segs.as_slice() {
        [hid, profiles, pid, ..] if hid == household_id && profiles == "profiles" && !pid.is_empty() => {
            Some(pid.clone())
        }
        _ => None,
    }
}

/// Extracts `{household}` from `/api/v1/households/{household}/...`.
pub fn household_id_from_path(path: &str) -> Option<String> {
    let segs = household_segments(path)?;
    segs.into_iter().next().filter(|hid| !hid.is_empty())
}
