//! Parsing of Key Vault `WWW-Authenticate` challenges.
//!
//! Key Vault and Managed HSM answer unauthenticated requests with a `401`
//! whose challenge names the Entra ID authority (and thereby the tenant) and
//! the resource a token must be issued for:
//!
//! ```text
//! WWW-Authenticate: Bearer authorization="https://login.microsoftonline.com/<tenant>",
//!                   resource="https://vault.azure.net"
//! ```
//!
//! Newer services send `scope="https://vault.azure.net/.default"` instead of
//! (or next to) `resource`. Parameters may come in any order, separated by
//! whitespace and/or commas, and may be mixed with parameters we ignore such
//! as `error` or `claims`.

use std::collections::HashMap;

use http::Response;
use http::header::WWW_AUTHENTICATE;
use url::Url;

use super::error::ChallengeError;

/// Suffix that turns a resource URI into a scope for its static permissions.
pub const DEFAULT_SCOPE_SUFFIX: &str = "/.default";

/// What a challenge asks the client to authenticate against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub tenant_id: String,
    /// Always ends in [`DEFAULT_SCOPE_SUFFIX`].
    pub scope: String,
}

impl Challenge {
    /// Check that the challenge's resource belongs to the host being called.
    ///
    /// The resource host must be the request host itself or one of its parent
    /// domains, so `https://vault.azure.net` is accepted for
    /// `myvault.vault.azure.net` while `https://vault.azure.cn` is not.
    pub fn verify_resource(&self, request_host: &str) -> Result<(), ChallengeError> {
        let request_host = request_host.to_ascii_lowercase();
        let mismatch = || ChallengeError::ResourceMismatch {
            resource: self.scope.clone(),
            host: request_host.clone(),
        };

        let resource_host = Url::parse(&self.scope)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .ok_or_else(mismatch)?;

        if request_host == resource_host || request_host.ends_with(&format!(".{resource_host}")) {
            Ok(())
        } else {
            Err(mismatch())
        }
    }
}

/// Read and parse the challenge carried by `response`.
///
/// When the response has several `WWW-Authenticate` headers the first
/// `Bearer` one is used.
pub fn extract_challenge<B>(response: &Response<B>) -> Result<Challenge, ChallengeError> {
    let mut values = response.headers().get_all(WWW_AUTHENTICATE).iter();
    let first = values
        .next()
        .ok_or_else(|| ChallengeError::Malformed("no WWW-Authenticate header".to_string()))?;

    let chosen = std::iter::once(first)
        .chain(values)
        .find(|value| {
            value
                .to_str()
                .is_ok_and(|v| v.trim_start().to_ascii_lowercase().starts_with("bearer"))
        })
        .unwrap_or(first);

    let header = chosen.to_str().map_err(|e| {
        ChallengeError::Malformed(format!("non-ASCII WWW-Authenticate header: {e}"))
    })?;

    parse_challenge(header)
}

/// Parse a `WWW-Authenticate` header value into a [`Challenge`].
pub fn parse_challenge(header: &str) -> Result<Challenge, ChallengeError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(malformed("empty WWW-Authenticate header"));
    }

    let mut tokens = tokenize(header)?;
    if tokens
        .first()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer"))
    {
        tokens.remove(0);
    }

    if tokens.len() < 2 {
        return Err(malformed(format!(
            "expected at least two parameters, found {}",
            tokens.len()
        )));
    }

    let mut params = HashMap::with_capacity(tokens.len());
    for token in &tokens {
        let Some((key, value)) = token.split_once('=') else {
            return Err(malformed(format!("parameter '{token}' is not a key=value pair")));
        };
        if key.is_empty() || key.contains('"') {
            return Err(malformed(format!("parameter '{token}' has an invalid key")));
        }
        params.insert(key.to_ascii_lowercase(), unquote(value));
    }

    let authorization = params
        .get("authorization")
        .or_else(|| params.get("authorization_uri"))
        .ok_or_else(|| malformed("missing authorization parameter"))?;
    let tenant_id = tenant_from_authority(authorization)?;

    let resource = params
        .get("scope")
        .or_else(|| params.get("resource"))
        .filter(|value| !value.is_empty())
        .ok_or_else(|| malformed("missing resource or scope parameter"))?;

    Ok(Challenge {
        tenant_id,
        scope: scope_for(resource),
    })
}

fn malformed(msg: impl Into<String>) -> ChallengeError {
    ChallengeError::Malformed(msg.into())
}

/// Split on whitespace and commas that are outside double quotes.
fn tokenize(input: &str) -> Result<Vec<String>, ChallengeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if !in_quotes && (c.is_whitespace() || c == ',') => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(malformed("unterminated quoted value"));
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    Ok(tokens)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// The tenant is the last path segment of the authority URL.
fn tenant_from_authority(authority: &str) -> Result<String, ChallengeError> {
    let url = Url::parse(authority)
        .map_err(|e| malformed(format!("authorization '{authority}' is not a URL: {e}")))?;

    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .map(str::to_string)
        .ok_or_else(|| malformed(format!("authorization '{authority}' names no tenant")))
}

fn scope_for(resource: &str) -> String {
    if resource.ends_with(DEFAULT_SCOPE_SUFFIX) {
        resource.to_string()
    } else {
        format!("{}{DEFAULT_SCOPE_SUFFIX}", resource.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;

    const TENANT: &str = "00000000-0000-0000-0000-000000000000";

    #[test]
    fn parses_resource_challenge() {
        let challenge = parse_challenge(
            r#"Bearer authorization="https://login.microsoftonline.com/00000000-0000-0000-0000-000000000000" resource="https://vault.azure.net""#,
        )
        .unwrap();

        assert_eq!(challenge.tenant_id, TENANT);
        assert_eq!(challenge.scope, "https://vault.azure.net/.default");
    }

    #[test]
    fn parses_reordered_scope_challenge_with_extra_resource() {
        let challenge = parse_challenge(
            r#"Bearer resource="https://managedhsm.azure.net" scope="https://managedhsm.azure.net/.default", authorization="https://login.microsoftonline.com/00000000-0000-0000-0000-000000000000""#,
        )
        .unwrap();

        assert_eq!(challenge.tenant_id, TENANT);
        assert_eq!(challenge.scope, "https://managedhsm.azure.net/.default");
    }

    #[test]
    fn parameter_order_does_not_matter() {
        let a = parse_challenge(
            r#"Bearer authorization="https://login.microsoftonline.com/tenant" resource="https://vault.azure.net""#,
        )
        .unwrap();
        let b = parse_challenge(
            r#"Bearer resource="https://vault.azure.net" authorization="https://login.microsoftonline.com/tenant""#,
        )
        .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn scope_is_not_suffixed_twice() {
        let challenge = parse_challenge(
            r#"Bearer authorization="https://login.microsoftonline.com/tenant", scope="https://vault.azure.net/.default""#,
        )
        .unwrap();

        assert_eq!(challenge.scope, "https://vault.azure.net/.default");
    }

    #[test]
    fn ignores_unrelated_parameters_with_spaces_and_equals() {
        let challenge = parse_challenge(
            r#"Bearer authorization_uri="https://login.windows.net/tenant", error="invalid_token", error_description="token has expired", claims="ey==", resource="https://vault.azure.net""#,
        )
        .unwrap();

        assert_eq!(challenge.tenant_id, "tenant");
        assert_eq!(challenge.scope, "https://vault.azure.net/.default");
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in [
            "",
            "   ",
            "Bearer",
            r#"Bearer authorization="https://login.microsoftonline.com/tenant""#,
            r#"Bearer authorization="https://login.microsoftonline.com/tenant" resource"#,
            r#"Basic realm="vault" resource="https://vault.azure.net""#,
            r#"Bearer authorization="https://login.microsoftonline.com/tenant" resource="https://vault.azure.net"#,
            r#"Bearer resource="https://vault.azure.net" error="invalid_token""#,
            r#"Bearer authorization="https://login.microsoftonline.com/tenant" error="invalid_token""#,
            r#"Bearer authorization="https://login.microsoftonline.com/" resource="https://vault.azure.net""#,
            r#"Bearer authorization="not a url" resource="https://vault.azure.net""#,
        ] {
            let result = parse_challenge(header);
            assert!(
                matches!(result, Err(ChallengeError::Malformed(_))),
                "expected Malformed for {header:?}, got {result:?}"
            );
        }
    }

    #[test]
    fn verifies_resource_against_request_host() {
        let cases = [
            ("https://vault.azure.net", true),
            ("https://vault.azure.net/.default", true),
            ("https://vault.azure.cn", false),
            ("https://myvault.azure.net", false),
            ("https://vault.azure.cn/.default", false),
            ("https://myvault.azure.net/.default", false),
        ];

        for (resource, ok) in cases {
            let challenge = Challenge {
                tenant_id: "tenant".into(),
                scope: scope_for(resource),
            };
            let result = challenge.verify_resource("fakevault.vault.azure.net");
            assert_eq!(result.is_ok(), ok, "resource {resource}: {result:?}");
            if !ok {
                assert!(result.unwrap_err().to_string().contains("challenge resource"));
            }
        }
    }

    #[test]
    fn verification_accepts_exact_host_and_ignores_case() {
        let challenge = Challenge {
            tenant_id: "tenant".into(),
            scope: "https://myhsm.managedhsm.azure.net/.default".into(),
        };

        assert!(challenge.verify_resource("MyHsm.ManagedHsm.Azure.Net").is_ok());

        let challenge = Challenge {
            tenant_id: "tenant".into(),
            scope: "https://vault.azure.net/.default".into(),
        };
        assert!(challenge.verify_resource("vault.azure.net").is_ok());
        // A suffix only counts at a label boundary
        assert!(challenge.verify_resource("evilvault.azure.net").is_err());
    }

    #[test]
    fn extracts_bearer_challenge_from_response() {
        let response = Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(WWW_AUTHENTICATE, r#"Basic realm="legacy""#)
            .header(
                WWW_AUTHENTICATE,
                r#"Bearer authorization="https://login.microsoftonline.com/tenant" resource="https://vault.azure.net""#,
            )
            .body(Full::<Bytes>::new(Bytes::new()))
            .unwrap();

        let challenge = extract_challenge(&response).unwrap();
        assert_eq!(challenge.tenant_id, "tenant");
    }

    #[test]
    fn missing_header_is_malformed() {
        let response = Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Full::<Bytes>::new(Bytes::new()))
            .unwrap();

        assert!(matches!(
            extract_challenge(&response),
            Err(ChallengeError::Malformed(_))
        ));
    }
}
