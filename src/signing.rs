//! HMAC-SHA256 request signing.
//!
//! Outbound calls to the knowledge-base and vector-database APIs are
//! authenticated by signing a canonical form of the request with a key
//! derived from the caller's secret. No bearer token is ever sent.
//!
//! # Canonical request
//!
//! ```text
//! <METHOD>\n
//! <path>\n
//! <raw query string, possibly empty>\n
//! content-type:<value>\n
//! host:<value>\n
//! x-content-sha256:<value>\n
//! x-date:<value>\n
//! \n
//! content-type;host;x-content-sha256;x-date\n
//! <hex sha256 of body>
//! ```
//!
//! The signed header set and its order are a contract with the remote
//! verifier. [`HeaderBlock`] is the only place that renders them.
//!
//! # Key derivation
//!
//! ```text
//! kDate    = HMAC(secret, dateStamp)
//! kRegion  = HMAC(kDate, region)
//! kService = HMAC(kRegion, service)
//! kSigning = HMAC(kService, "request")
//! ```
//!
//! # Signature
//!
//! ```text
//! stringToSign = "HMAC-SHA256\n" + timestamp + "\n" + scope + "\n" + hex(sha256(canonical))
//! signature    = hex(HMAC(kSigning, stringToSign))
//! ```
//!
//! Nothing in this module performs I/O, and no derived key or signature is
//! ever written to a log.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Algorithm label used in the string-to-sign and the authorization header.
pub const ALGORITHM: &str = "HMAC-SHA256";

/// Final label of the key-derivation chain and the credential scope.
const SCOPE_TERMINATOR: &str = "request";

/// Signed header names, in the order they are canonicalized.
pub const SIGNED_HEADER_NAMES: [&str; 4] = ["content-type", "host", "x-content-sha256", "x-date"];

/// Content type of every signed request body.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Header carrying the account identifier. Sent but not signed.
pub const ACCOUNT_ID_HEADER: &str = "V-Account-Id";

// ============ Credential ============

/// Identity used to sign requests for one remote service.
///
/// Built once at startup from configuration and shared read-only.
#[derive(Clone)]
pub struct Credential {
    pub account_id: String,
    pub access_key: String,
    secret_key: String,
    pub region: String,
    pub service: String,
}

impl Credential {
    pub fn new(
        account_id: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            service: service.into(),
        }
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &self.account_id)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("service", &self.service)
            .finish()
    }
}

// ============ Signing time ============

/// The single instant a request is signed at.
///
/// The header value, the credential scope, and the string-to-sign all read
/// from the same `SigningTime`, so they can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningTime {
    timestamp: String,
    date_stamp: String,
}

impl SigningTime {
    pub fn at(instant: DateTime<Utc>) -> Self {
        let timestamp = instant.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = timestamp[..8].to_string();
        Self {
            timestamp,
            date_stamp,
        }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Parse an `X-Date` header value back into a signing time.
    pub fn from_timestamp(timestamp: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(timestamp, "%Y%m%dT%H%M%SZ")
            .ok()
            .map(|naive| Self::at(naive.and_utc()))
    }

    /// `YYYYMMDDTHHMMSSZ`
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `YYYYMMDD`
    pub fn date_stamp(&self) -> &str {
        &self.date_stamp
    }
}

// ============ Canonicalization ============

/// The four signed headers, always rendered lower-case in fixed order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    content_type: String,
    host: String,
    content_sha256: String,
    date: String,
}

impl HeaderBlock {
    /// Collect signed headers from arbitrary name/value pairs.
    ///
    /// Names are matched case-insensitively. Headers outside the signed set
    /// are ignored, and a later pair for the same name replaces an earlier one.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut block = HeaderBlock::default();
        for (name, value) in pairs {
            let slot = match name.as_ref().trim().to_ascii_lowercase().as_str() {
                "content-type" => &mut block.content_type,
                "host" => &mut block.host,
                "x-content-sha256" => &mut block.content_sha256,
                "x-date" => &mut block.date,
                _ => continue,
            };
            let value: String = value.into();
            *slot = value.trim().to_string();
        }
        block
    }

    fn entries(&self) -> [(&'static str, &str); 4] {
        [
            (SIGNED_HEADER_NAMES[0], self.content_type.as_str()),
            (SIGNED_HEADER_NAMES[1], self.host.as_str()),
            (SIGNED_HEADER_NAMES[2], self.content_sha256.as_str()),
            (SIGNED_HEADER_NAMES[3], self.date.as_str()),
        ]
    }

    /// `name:value\n` for each signed header, in canonical order.
    pub fn canonical(&self) -> String {
        self.entries()
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value))
            .collect()
    }

    /// Semicolon-joined signed header names.
    pub fn signed_headers(&self) -> String {
        SIGNED_HEADER_NAMES.join(";")
    }
}

/// Canonical form of one outbound request.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    method: String,
    path: String,
    query: String,
    headers: HeaderBlock,
    content_sha256: String,
}

impl CanonicalRequest {
    pub fn new(
        method: &str,
        path: &str,
        query: &str,
        host: &str,
        body: &[u8],
        time: &SigningTime,
    ) -> Self {
        let content_sha256 = hex_sha256(body);
        // Same order `SignedHeaders::apply` puts them on the wire.
        let headers = HeaderBlock::from_pairs([
            ("Host", host),
            ("Content-Type", CONTENT_TYPE_JSON),
            ("X-Content-Sha256", content_sha256.as_str()),
            ("X-Date", time.timestamp()),
        ]);
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: query.to_string(),
            headers,
            content_sha256,
        }
    }

    pub fn content_sha256(&self) -> &str {
        &self.content_sha256
    }

    pub fn headers(&self) -> &HeaderBlock {
        &self.headers
    }

    pub fn signed_headers(&self) -> String {
        self.headers.signed_headers()
    }

    pub fn to_canonical_string(&self) -> String {
        let header_block = self.headers.canonical();
        let signed_headers = self.headers.signed_headers();
        [
            self.method.as_str(),
            self.path.as_str(),
            self.query.as_str(),
            header_block.as_str(),
            signed_headers.as_str(),
            self.content_sha256.as_str(),
        ]
        .join("\n")
    }
}

// ============ Primitives ============

/// Hex-encoded SHA-256 of `data`.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the date-, region- and service-scoped signing key.
pub fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(secret_key.as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
}

/// `dateStamp/region/service/request`
pub fn credential_scope(date_stamp: &str, region: &str, service: &str) -> String {
    format!("{}/{}/{}/{}", date_stamp, region, service, SCOPE_TERMINATOR)
}

pub fn string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        timestamp,
        scope,
        hex_sha256(canonical_request.as_bytes())
    )
}

pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

// ============ Signer ============

/// The parts of an outbound request that participate in signing.
#[derive(Debug, Clone, Copy)]
pub struct OutboundRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    /// Destination authority (`host[:port]`), set explicitly by the caller.
    pub host: &'a str,
    pub body: &'a [u8],
}

/// Headers that authenticate one signed request.
#[derive(Clone)]
pub struct SignedHeaders {
    pub authorization: String,
    pub date: String,
    pub content_sha256: String,
    pub host: String,
    pub content_type: &'static str,
    pub account_id: String,
}

impl SignedHeaders {
    /// Attach every signing header to an outbound `reqwest` request.
    ///
    /// The account header is unsigned and omitted when no account is set.
    pub fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder
            .header("Host", &self.host)
            .header("Content-Type", self.content_type)
            .header("X-Content-Sha256", &self.content_sha256)
            .header("X-Date", &self.date)
            .header("Authorization", &self.authorization);
        if self.account_id.is_empty() {
            builder
        } else {
            builder.header(ACCOUNT_ID_HEADER, &self.account_id)
        }
    }
}

impl fmt::Debug for SignedHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedHeaders")
            .field("authorization", &"<redacted>")
            .field("date", &self.date)
            .field("content_sha256", &self.content_sha256)
            .field("host", &self.host)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Signs requests with one immutable [`Credential`].
#[derive(Debug, Clone)]
pub struct Signer {
    credential: Credential,
}

impl Signer {
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Sign `request` at `time`. Every time-dependent field comes from the
    /// one `SigningTime` passed in.
    pub fn sign(&self, request: &OutboundRequest<'_>, time: &SigningTime) -> SignedHeaders {
        let cred = &self.credential;
        let canonical = CanonicalRequest::new(
            request.method,
            request.path,
            request.query,
            request.host,
            request.body,
            time,
        );

        let scope = credential_scope(time.date_stamp(), &cred.region, &cred.service);
        let to_sign = string_to_sign(time.timestamp(), &scope, &canonical.to_canonical_string());
        let signing_key =
            derive_signing_key(cred.secret_key(), time.date_stamp(), &cred.region, &cred.service);
        let signature = compute_signature(&signing_key, &to_sign);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            cred.access_key,
            scope,
            canonical.signed_headers(),
            signature
        );

        SignedHeaders {
            authorization,
            date: time.timestamp().to_string(),
            content_sha256: canonical.content_sha256().to_string(),
            host: request.host.to_string(),
            content_type: CONTENT_TYPE_JSON,
            account_id: cred.account_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOST: &str = "api-knowledgebase.mlp.cn-hongkong.bytepluses.com";
    const PATH: &str = "/api/knowledge/collection/search_knowledge";
    const BODY: &str = r#"{"project":"default","name":"test","query":"what is the refund policy","limit":10,"pre_processing":{"need_instruction":true,"rewrite":false,"return_token_usage":true,"messages":[{"role":"system","content":""},{"role":"user","content":"what is the refund policy"}]},"dense_weight":0.5,"post_processing":{"get_attachment_link":true,"chunk_group":true,"rerank_only_chunk":false,"rerank_switch":false,"chunk_diffusion_count":0}}"#;
    const BODY_SHA256: &str = "20ad2a7845ec775bcea7a0b54cd8dbc9e40ae646a60264a596929be4c3d6f907";

    fn new_year() -> SigningTime {
        SigningTime::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    fn credential() -> Credential {
        Credential::new("2100000000", "AKEXAMPLE", "s3cr3t", "cn-hongkong", "air")
    }

    fn request() -> OutboundRequest<'static> {
        OutboundRequest {
            method: "POST",
            path: PATH,
            query: "",
            host: HOST,
            body: BODY.as_bytes(),
        }
    }

    #[test]
    fn test_signing_time_formats() {
        let t = SigningTime::at(Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap());
        assert_eq!(t.timestamp(), "20240309T070502Z");
        assert_eq!(t.date_stamp(), "20240309");
    }

    #[test]
    fn test_signing_time_round_trips_header_value() {
        let t = SigningTime::from_timestamp("20240101T000000Z").unwrap();
        assert_eq!(t, new_year());
        assert!(SigningTime::from_timestamp("2024-01-01").is_none());
    }

    #[test]
    fn test_empty_body_hash() {
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_key_chain_reference_vectors() {
        let k_date = hmac_sha256(b"s3cr3t", b"20240101");
        assert_eq!(
            hex::encode(&k_date),
            "e5997f09c300c59c24fea4989cf3b2f1b68597ad7b70832384ac30008b487e52"
        );
        let k_region = hmac_sha256(&k_date, b"cn-hongkong");
        assert_eq!(
            hex::encode(&k_region),
            "a8f2dd124b12034091fb0ea1023a01be8c845ff0f6f4d266d9ea735b67783397"
        );
        let k_service = hmac_sha256(&k_region, b"air");
        assert_eq!(
            hex::encode(&k_service),
            "167b6ef681e8e2a206808e1fbc88689e9c95a8dd951b74160cd76a7cafe25f92"
        );

        let k_signing = derive_signing_key("s3cr3t", "20240101", "cn-hongkong", "air");
        assert_eq!(
            hex::encode(k_signing),
            "60ea9aec06f1d0179095445858b308826ed1f99abb4e2aebc45a31b298b7e467"
        );
    }

    #[test]
    fn test_canonical_request_layout() {
        let canonical = CanonicalRequest::new("post", PATH, "", HOST, BODY.as_bytes(), &new_year());
        assert_eq!(canonical.content_sha256(), BODY_SHA256);

        let expected = format!(
            "POST\n{}\n\ncontent-type:application/json\nhost:{}\nx-content-sha256:{}\nx-date:20240101T000000Z\n\ncontent-type;host;x-content-sha256;x-date\n{}",
            PATH, HOST, BODY_SHA256, BODY_SHA256
        );
        assert_eq!(canonical.to_canonical_string(), expected);
    }

    #[test]
    fn test_canonical_request_keeps_empty_query_and_body() {
        let canonical = CanonicalRequest::new("GET", "/", "", "example.com", b"", &new_year());
        let s = canonical.to_canonical_string();
        assert!(s.starts_with("GET\n/\n\ncontent-type:"));
        assert!(s.ends_with("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"));
    }

    #[test]
    fn test_canonical_request_includes_raw_query() {
        let canonical = CanonicalRequest::new("GET", "/docs", "limit=10&offset=0", "h", b"", &new_year());
        assert!(canonical
            .to_canonical_string()
            .starts_with("GET\n/docs\nlimit=10&offset=0\n"));
    }

    #[test]
    fn test_header_block_order_independent_of_insertion() {
        let pairs = [
            ("Content-Type", "application/json"),
            ("Host", HOST),
            ("X-Content-Sha256", BODY_SHA256),
            ("X-Date", "20240101T000000Z"),
        ];
        let reference = HeaderBlock::from_pairs(pairs);

        let permutations: [[usize; 4]; 5] = [
            [3, 2, 1, 0],
            [1, 3, 0, 2],
            [2, 0, 3, 1],
            [0, 3, 2, 1],
            [3, 0, 1, 2],
        ];
        for order in permutations {
            let shuffled = order.iter().map(|&i| pairs[i]);
            let block = HeaderBlock::from_pairs(shuffled);
            assert_eq!(block.canonical(), reference.canonical());
            assert_eq!(block.signed_headers(), reference.signed_headers());
        }

        assert_eq!(
            reference.signed_headers(),
            "content-type;host;x-content-sha256;x-date"
        );
        assert_eq!(
            reference.canonical(),
            format!(
                "content-type:application/json\nhost:{}\nx-content-sha256:{}\nx-date:20240101T000000Z\n",
                HOST, BODY_SHA256
            )
        );
    }

    #[test]
    fn test_header_block_ignores_unsigned_and_normalizes_case() {
        let block = HeaderBlock::from_pairs([
            ("V-Account-Id", "2100000000"),
            ("ACCEPT", "application/json"),
            ("X-DATE", "20240101T000000Z"),
            ("HOST", "example.com"),
            ("content-TYPE", "application/json"),
            ("x-content-sha256", "abc"),
        ]);
        assert_eq!(
            block.canonical(),
            "content-type:application/json\nhost:example.com\nx-content-sha256:abc\nx-date:20240101T000000Z\n"
        );
    }

    #[test]
    fn test_canonical_request_headers_match_any_wire_order() {
        let canonical = CanonicalRequest::new("POST", PATH, "", HOST, BODY.as_bytes(), &new_year());
        let wire = [
            ("X-Date", "20240101T000000Z"),
            ("X-Content-Sha256", BODY_SHA256),
            ("Content-Type", CONTENT_TYPE_JSON),
            ("Host", HOST),
        ];
        assert_eq!(canonical.headers(), &HeaderBlock::from_pairs(wire));
        assert_eq!(
            canonical.headers(),
            &HeaderBlock::from_pairs(wire.iter().rev().copied())
        );
    }

    #[test]
    fn test_signature_matches_fixture() {
        let signed = Signer::new(credential()).sign(&request(), &new_year());
        assert_eq!(
            signed.authorization,
            "HMAC-SHA256 Credential=AKEXAMPLE/20240101/cn-hongkong/air/request, \
             SignedHeaders=content-type;host;x-content-sha256;x-date, \
             Signature=ddb2cfd8654be7b9ffb029a89e63df199196d711de1c0ea18637e076ad29e727"
        );
        assert_eq!(signed.date, "20240101T000000Z");
        assert_eq!(signed.content_sha256, BODY_SHA256);
        assert_eq!(signed.host, HOST);
        assert_eq!(signed.account_id, "2100000000");
    }

    #[test]
    fn test_signing_is_deterministic() {
        let signer = Signer::new(credential());
        let a = signer.sign(&request(), &new_year());
        let b = signer.sign(&request(), &new_year());
        assert_eq!(a.authorization, b.authorization);

        let later = SigningTime::at(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        let c = signer.sign(&request(), &later);
        assert_ne!(a.authorization, c.authorization);
        assert!(c.authorization.contains("/20240102/cn-hongkong/air/request"));
    }

    #[test]
    fn test_apply_attaches_signed_headers() {
        let signed = Signer::new(credential()).sign(&request(), &new_year());
        let built = signed
            .apply(reqwest::Client::new().post(format!("https://{}/search", HOST)))
            .build()
            .unwrap();
        let headers = built.headers();
        assert_eq!(headers["host"], HOST);
        assert_eq!(headers["content-type"], CONTENT_TYPE_JSON);
        assert_eq!(headers["x-date"], "20240101T000000Z");
        assert_eq!(headers["x-content-sha256"], BODY_SHA256);
        assert_eq!(headers["v-account-id"], "2100000000");
        assert_eq!(headers["authorization"], signed.authorization.as_str());

        let no_account = Credential::new("", "AKEXAMPLE", "s3cr3t", "cn-hongkong", "air");
        let signed = Signer::new(no_account).sign(&request(), &new_year());
        let built = signed
            .apply(reqwest::Client::new().post(format!("https://{}/search", HOST)))
            .build()
            .unwrap();
        assert!(built.headers().get(ACCOUNT_ID_HEADER).is_none());
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let cred = credential();
        let rendered = format!("{:?}", cred);
        assert!(!rendered.contains("s3cr3t"));

        let signed = Signer::new(cred).sign(&request(), &new_year());
        let rendered = format!("{:?}", signed);
        assert!(!rendered.contains("Signature="));
    }
}
