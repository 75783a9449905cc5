//! Minimal multipart/form-data helpers for the transcription relay.
//!
//! Only two operations are needed: read the `model` field, and splice a
//! replacement value into it. Everything else in the body is opaque and
//! forwarded byte-for-byte.

/// Boundary string from a `multipart/form-data; boundary=...` content type.
pub fn boundary_of(content_type: &str) -> Option<&str> {
    let (_, params) = content_type.split_once(';')?;
    params.split(';').find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        (name.eq_ignore_ascii_case("boundary")).then(|| value.trim_matches('"'))
    })
}

/// Byte range of the `model` field's value inside the body.
fn model_value_range(body: &[u8]) -> Option<(usize, usize)> {
    let needle = b"name=\"model\"";
    let field_at = find(body, needle, 0)?;
    // Value starts after the part's blank line.
    let value_start = find(body, b"\r\n\r\n", field_at)? + 4;
    // And runs to the next CRLF (the boundary line follows).
    let value_end = find(body, b"\r\n", value_start)?;
    Some((value_start, value_end))
}

pub fn extract_model(body: &[u8]) -> Option<String> {
    let (start, end) = model_value_range(body)?;
    Some(String::from_utf8_lossy(&body[start..end]).into_owned())
}

/// Rewrite the `model` field in place; the rest of the body is untouched.
/// Returns the original body when no model field exists.
pub fn replace_model(body: &[u8], replacement: &str) -> Vec<u8> {
    match model_value_range(body) {
        Some((start, end)) => {
            let mut out = Vec::with_capacity(body.len() + replacement.len());
            out.extend_from_slice(&body[..start]);
            out.extend_from_slice(replacement.as_bytes());
            out.extend_from_slice(&body[end..]);
            out
        }
        None => body.to_vec(),
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| from + at)
}
