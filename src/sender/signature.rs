use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Seconds a signature stays valid after it is issued.
pub const SIGNATURE_EXPIRY_SECS: i64 = 300;

/// Clock skew tolerated on the collector side.
const SIGN_TIME_SKEW_SECS: i64 = 60;

/// Request parts covered by the `Authorization` signature.
///
/// Parameter and header keys are sorted before signing. Only `content-type`,
/// `content-md5`, `host` and `x-*` headers are included.
#[derive(Debug, Clone)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub params: Vec<(&'a str, &'a str)>,
    pub headers: Vec<(&'a str, &'a str)>,
}

/// Builds the `q-sign-algorithm=sha1` authorization value for a request
/// issued at `now` (unix seconds).
pub fn authorization(
    secret_id: &str,
    secret_key: &str,
    request: &SignedRequest<'_>,
    now: i64,
) -> Result<String, InvalidLength> {
    let mut params: Vec<(String, &str)> = request
        .params
        .iter()
        .map(|(key, value)| ((*key).to_string(), *value))
        .collect();
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let mut headers: Vec<(String, &str)> = request
        .headers
        .iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), *value))
        .filter(|(key, _)| is_signed_header(key))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let param_list = join_keys(&params);
    let header_list = join_keys(&headers);
    let http_request_info = format!(
        "{}\n{}\n{}\n{}\n",
        request.method.to_ascii_lowercase(),
        request.path,
        join_pairs(&params),
        join_pairs(&headers)
    );

    let sign_time = format!(
        "{};{}",
        now - SIGN_TIME_SKEW_SECS,
        now + SIGNATURE_EXPIRY_SECS
    );
    let sign_key = hmac_sha1_hex(secret_key.as_bytes(), sign_time.as_bytes())?;
    let string_to_sign = format!(
        "sha1\n{sign_time}\n{}\n",
        hex::encode(Sha1::digest(http_request_info.as_bytes()))
    );
    let signature = hmac_sha1_hex(sign_key.as_bytes(), string_to_sign.as_bytes())?;

    Ok(format!(
        "q-sign-algorithm=sha1&q-ak={secret_id}&q-sign-time={sign_time}&q-key-time={sign_time}\
         &q-header-list={header_list}&q-url-param-list={param_list}&q-signature={signature}"
    ))
}

fn is_signed_header(key: &str) -> bool {
    matches!(key, "content-type" | "content-md5" | "host") || key.starts_with('x')
}

fn join_keys(pairs: &[(String, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

fn join_pairs(pairs: &[(String, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={}", url_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes everything except RFC 3986 unreserved characters, with
/// upper-case hex digits.
fn url_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn hmac_sha1_hex(key: &[u8], data: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(key)?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
