//! AWS SigV4-style request signing for the node API
//!
//! Requests are signed over the full canonical request with service `CSI`
//! and an empty region. The verifier requires a body hash header, refuses
//! `UNSIGNED-PAYLOAD`, requires `host` and `x-amz-date` among the signed
//! headers and rejects timestamps outside the allowed skew.

use crate::admin::Credential;
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const SERVICE: &str = "CSI";
pub const REGION: &str = "";
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(15);
pub const MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_DATE: &str = "x-amz-date";
pub const HEADER_CONTENT_SHA256: &str = "x-amz-content-sha256";
pub const HEADER_HOST: &str = "host";

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const SCOPE_TERMINATOR: &str = "aws4_request";

/// The parts of an HTTP request that are covered by the signature.
/// Header names must be lowercase.
#[derive(Debug, Clone, Copy)]
pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub body: &'a [u8],
}

/// Parsed `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
struct Authorization {
    access_key: String,
    date: String,
    region: String,
    service: String,
    signed_headers: Vec<String>,
    signature: String,
}

pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Internal(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret_key: &str, date: &str) -> Result<Vec<u8>> {
    let key = hmac(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes())?;
    let key = hmac(&key, REGION.as_bytes())?;
    let key = hmac(&key, SERVICE.as_bytes())?;
    hmac(&key, SCOPE_TERMINATOR.as_bytes())
}

fn scope(date: &str) -> String {
    format!("{}/{}/{}/{}", date, REGION, SERVICE, SCOPE_TERMINATOR)
}

fn encode_path(path: &str) -> String {
    if path.is_empty() {
        return "/".into();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            };
            (
                urlencoding::encode(&decode(key)).into_owned(),
                urlencoding::encode(&decode(value)).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_request(
    request: &SignableRequest<'_>,
    signed_headers: &[String],
    payload_hash: &str,
) -> Result<String> {
    let mut headers = String::new();
    for name in signed_headers {
        let value = request
            .headers
            .get(name)
            .ok_or_else(|| Error::Auth(format!("signed header {} missing", name)))?;
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        headers.push_str(&format!("{}:{}\n", name, value));
    }
    Ok(format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_uppercase(),
        encode_path(request.path),
        canonical_query(request.query),
        headers,
        signed_headers.join(";"),
        payload_hash
    ))
}

fn signature(
    secret_key: &str,
    amz_date: &str,
    date: &str,
    canonical_request: &str,
) -> Result<String> {
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope(date),
        payload_hash(canonical_request.as_bytes())
    );
    Ok(hex::encode(hmac(
        &signing_key(secret_key, date)?,
        string_to_sign.as_bytes(),
    )?))
}

/// Headers to add to a request so it verifies: `x-amz-date`,
/// `x-amz-content-sha256` and `authorization`. `host` is signed and must
/// already be present in `request.headers`.
pub fn sign(
    request: &SignableRequest<'_>,
    credential: &Credential,
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, String>> {
    if !request.headers.contains_key(HEADER_HOST) {
        return Err(Error::Auth("host header is required for signing".into()));
    }
    let amz_date = now.format(DATE_FORMAT).to_string();
    let date = now.format("%Y%m%d").to_string();
    let body_hash = payload_hash(request.body);

    let mut headers = request.headers.clone();
    headers.insert(HEADER_DATE.into(), amz_date.clone());
    headers.insert(HEADER_CONTENT_SHA256.into(), body_hash.clone());

    let signed_headers: Vec<String> = vec![
        HEADER_HOST.into(),
        HEADER_CONTENT_SHA256.into(),
        HEADER_DATE.into(),
    ];
    let signed_request = SignableRequest {
        headers: &headers,
        ..*request
    };
    let canonical = canonical_request(&signed_request, &signed_headers, &body_hash)?;
    let signature = signature(&credential.secret_key, &amz_date, &date, &canonical)?;

    let mut added = BTreeMap::new();
    added.insert(HEADER_DATE.into(), amz_date);
    added.insert(HEADER_CONTENT_SHA256.into(), body_hash);
    added.insert(
        HEADER_AUTHORIZATION.into(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            credential.access_key,
            scope(&date),
            signed_headers.join(";"),
            signature
        ),
    );
    Ok(added)
}

fn parse_authorization(value: &str) -> Result<Authorization> {
    let rest = value
        .strip_prefix(ALGORITHM)
        .ok_or_else(|| Error::Auth("unsupported signature algorithm".into()))?;

    let mut fields = BTreeMap::new();
    for field in rest.split(',') {
        let (key, value) = field
            .trim()
            .split_once('=')
            .ok_or_else(|| Error::Auth("malformed authorization header".into()))?;
        fields.insert(key, value);
    }
    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| Error::Auth(format!("authorization header missing {}", key)))
    };

    let credential: Vec<&str> = field("Credential")?.split('/').collect();
    let [access_key, date, region, service, terminator] = credential.as_slice() else {
        return Err(Error::Auth("malformed credential scope".into()));
    };
    if *terminator != SCOPE_TERMINATOR {
        return Err(Error::Auth("malformed credential scope".into()));
    }

    Ok(Authorization {
        access_key: access_key.to_string(),
        date: date.to_string(),
        region: region.to_string(),
        service: service.to_string(),
        signed_headers: field("SignedHeaders")?
            .split(';')
            .map(str::to_string)
            .collect(),
        signature: field("Signature")?.to_string(),
    })
}

/// Check a signed request against `credential` at time `now`
pub fn verify(
    request: &SignableRequest<'_>,
    credential: &Credential,
    now: DateTime<Utc>,
) -> Result<()> {
    let header = |name: &str| {
        request
            .headers
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::Auth(format!("{} header missing", name)))
    };

    let auth = parse_authorization(header(HEADER_AUTHORIZATION)?)?;
    if auth.access_key != credential.access_key {
        return Err(Error::Auth("access key does not match".into()));
    }
    if auth.service != SERVICE || auth.region != REGION {
        return Err(Error::Auth("invalid service or region in credential scope".into()));
    }
    for required in [HEADER_HOST, HEADER_DATE] {
        if !auth.signed_headers.iter().any(|h| h == required) {
            return Err(Error::Auth(format!("{} must be a signed header", required)));
        }
    }

    let amz_date = header(HEADER_DATE)?;
    let signed_at = NaiveDateTime::parse_from_str(amz_date, DATE_FORMAT)
        .map_err(|_| Error::Auth(format!("invalid {} header", HEADER_DATE)))?
        .and_utc();
    let skew_ms = (now - signed_at).num_milliseconds().unsigned_abs();
    if u128::from(skew_ms) > MAX_CLOCK_SKEW.as_millis() {
        return Err(Error::Auth("request time too skewed".into()));
    }
    if !amz_date.starts_with(&auth.date) {
        return Err(Error::Auth("credential date does not match request date".into()));
    }

    let content_hash = header(HEADER_CONTENT_SHA256)?;
    if content_hash == UNSIGNED_PAYLOAD {
        return Err(Error::Auth("unsigned payload is not accepted".into()));
    }
    if content_hash != payload_hash(request.body) {
        return Err(Error::Auth("content hash does not match body".into()));
    }

    let canonical = canonical_request(request, &auth.signed_headers, content_hash)?;
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope(&auth.date),
        payload_hash(canonical.as_bytes())
    );
    let provided = hex::decode(&auth.signature)
        .map_err(|_| Error::Auth("malformed signature".into()))?;
    let mut mac = HmacSha256::new_from_slice(&signing_key(&credential.secret_key, &auth.date)?)
        .map_err(|e| Error::Internal(format!("invalid signing key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    mac.verify_slice(&provided)
        .map_err(|_| Error::Auth("signature does not match".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use tokio_test::assert_ok;

    fn credential() -> Credential {
        Credential {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn signed(body: &[u8]) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), "10.0.0.5:40443".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        let request = SignableRequest {
            method: "POST",
            path: "/devices/list",
            query: "",
            headers: &headers,
            body,
        };
        let added = sign(&request, &credential(), now()).unwrap();
        headers.extend(added);
        headers
    }

    fn request<'a>(headers: &'a BTreeMap<String, String>, body: &'a [u8]) -> SignableRequest<'a> {
        SignableRequest {
            method: "POST",
            path: "/devices/list",
            query: "",
            headers,
            body,
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let body = br#"{"devices":[]}"#;
        let headers = signed(body);
        assert!(headers[HEADER_AUTHORIZATION].contains("/20240301//CSI/aws4_request"));
        assert_ok!(verify(&request(&headers, body), &credential(), now()));

        // Within the allowed skew
        let later = now() + chrono::Duration::seconds(10);
        assert_ok!(verify(&request(&headers, body), &credential(), later));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let body = br#"{"devices":[]}"#;
        let headers = signed(body);

        assert_matches!(
            verify(&request(&headers, b"{}"), &credential(), now()),
            Err(Error::Auth(msg)) if msg.contains("content hash")
        );

        let mut moved = headers.clone();
        moved.insert("host".into(), "10.0.0.6:40443".into());
        assert_matches!(
            verify(&request(&moved, body), &credential(), now()),
            Err(Error::Auth(msg)) if msg.contains("signature")
        );

        let mut other = credential();
        other.secret_key = "other".into();
        assert_matches!(
            verify(&request(&headers, body), &other, now()),
            Err(Error::Auth(_))
        );
    }

    #[test]
    fn test_verify_rejects_skew() {
        let body = b"{}";
        let headers = signed(body);
        let late = now() + chrono::Duration::seconds(16);
        assert_matches!(
            verify(&request(&headers, body), &credential(), late),
            Err(Error::Auth(msg)) if msg.contains("skewed")
        );
    }

    #[test]
    fn test_verify_requires_signed_date_and_payload_hash() {
        let body = b"{}";
        let headers = signed(body);

        let mut unsigned_date = headers.clone();
        let auth = unsigned_date[HEADER_AUTHORIZATION].replace(
            "SignedHeaders=host;x-amz-content-sha256;x-amz-date",
            "SignedHeaders=host;x-amz-content-sha256",
        );
        unsigned_date.insert(HEADER_AUTHORIZATION.into(), auth);
        assert_matches!(
            verify(&request(&unsigned_date, body), &credential(), now()),
            Err(Error::Auth(msg)) if msg.contains("x-amz-date")
        );

        let mut unsigned_payload = headers.clone();
        unsigned_payload.insert(HEADER_CONTENT_SHA256.into(), UNSIGNED_PAYLOAD.into());
        assert_matches!(
            verify(&request(&unsigned_payload, body), &credential(), now()),
            Err(Error::Auth(msg)) if msg.contains("unsigned")
        );

        let mut missing = headers;
        missing.remove(HEADER_CONTENT_SHA256);
        assert_matches!(
            verify(&request(&missing, body), &credential(), now()),
            Err(Error::Auth(_))
        );
    }

    #[test]
    fn test_canonical_query_sorted_and_encoded() {
        assert_eq!(canonical_query("b=2&a=1&a=0"), "a=0&a=1&b=2");
        assert_eq!(canonical_query("name=sd a"), "name=sd%20a");
        assert_eq!(canonical_query(""), "");
    }
}
