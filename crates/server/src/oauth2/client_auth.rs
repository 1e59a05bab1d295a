//! Client authentication at the token, revocation and device endpoints.

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sea_orm::{ConnectionTrait, EntityTrait};

use crate::entity::oauth2_client;
use crate::error::OAuth2Error;
use crate::oauth2::secrets;

pub const METHOD_BASIC: &str = "client_secret_basic";
pub const METHOD_POST: &str = "client_secret_post";
pub const METHOD_NONE: &str = "none";

pub const METHODS: [&str; 3] = [METHOD_BASIC, METHOD_POST, METHOD_NONE];

/// Credentials as presented by the caller.
#[derive(Debug, PartialEq, Eq)]
pub struct PresentedCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub method: &'static str,
}

/// Undoes the `application/x-www-form-urlencoded` encoding RFC 6749 section
/// 2.3.1 applies to both halves of Basic credentials.
fn form_decode(value: &str) -> Option<String> {
    urlencoding::decode(&value.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn basic_credentials(value: &str) -> Result<PresentedCredentials, OAuth2Error> {
    let malformed = || OAuth2Error::invalid_client("The client credentials in the Authorization header are malformed.");
    let decoded = STANDARD.decode(value.trim()).map_err(|_| malformed())?;
    let creds = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (id, secret) = creds.split_once(':').ok_or_else(malformed)?;
    Ok(PresentedCredentials {
        client_id: form_decode(id).ok_or_else(malformed)?,
        client_secret: Some(form_decode(secret).ok_or_else(malformed)?),
        method: METHOD_BASIC,
    })
}

/// Reads HTTP Basic credentials, falling back to the form body.
pub fn extract_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<Option<PresentedCredentials>, OAuth2Error> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
    {
        return basic_credentials(auth).map(Some);
    }

    let Some(client_id) = form_client_id.filter(|id| !id.is_empty()) else {
        return Ok(None);
    };
    let client_secret = form_client_secret.filter(|s| !s.is_empty());
    Ok(Some(PresentedCredentials {
        client_id: client_id.to_string(),
        client_secret: client_secret.map(str::to_string),
        method: if client_secret.is_some() { METHOD_POST } else { METHOD_NONE },
    }))
}

/// Authenticates the calling client with the method it registered.
pub async fn authenticate<C: ConnectionTrait>(
    conn: &C,
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<oauth2_client::Model, OAuth2Error> {
    let presented = extract_credentials(headers, form_client_id, form_client_secret)?
        .ok_or_else(|| {
            OAuth2Error::invalid_client("Client credentials are missing from the request.")
        })?;

    let Some(client) = oauth2_client::Entity::find_by_id(&presented.client_id)
        .one(conn)
        .await?
    else {
        tracing::warn!(client_id = %presented.client_id, "Authentication of unknown client");
        return Err(OAuth2Error::invalid_client(
            "The requested OAuth 2.0 Client does not exist.",
        ));
    };

    if presented.method != client.token_endpoint_auth_method {
        tracing::warn!(
            client_id = %client.id,
            registered = %client.token_endpoint_auth_method,
            presented = presented.method,
            "Client used an unexpected authentication method"
        );
        return Err(OAuth2Error::invalid_client(format!(
            "The OAuth 2.0 Client supports client authentication method '{}', but method '{}' was requested.",
            client.token_endpoint_auth_method, presented.method
        )));
    }

    if client.is_public() {
        return Ok(client);
    }

    let valid = match (&presented.client_secret, &client.secret_hash) {
        (Some(secret), Some(hash)) => secrets::verify_secret(secret, hash),
        _ => false,
    };
    if !valid {
        tracing::warn!(client_id = %client.id, "Client secret mismatch");
        return Err(OAuth2Error::invalid_client(
            "The provided client secret did not match the registered client secret.",
        ));
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::http::HeaderValue;

    #[test]
    fn basic_credentials_take_precedence() {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("my-client:s3cret");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        let creds = extract_credentials(&headers, Some("other"), Some("x")).unwrap().unwrap();
        assert_eq!(creds.client_id, "my-client");
        assert_eq!(creds.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(creds.method, METHOD_BASIC);
    }

    #[test]
    fn form_credentials() {
        let headers = HeaderMap::new();
        let post = extract_credentials(&headers, Some("c"), Some("s")).unwrap().unwrap();
        assert_eq!(post.method, METHOD_POST);

        let public = extract_credentials(&headers, Some("c"), None).unwrap().unwrap();
        assert_eq!(public.method, METHOD_NONE);
        assert!(public.client_secret.is_none());

        assert!(extract_credentials(&headers, None, Some("s")).unwrap().is_none());
    }

    fn basic_header(credentials: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode(credentials);
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn basic_credentials_are_form_decoded() {
        let headers = basic_header("my%3Aclient:s3cret%2Bvalue%2Fx+y%25");
        let creds = extract_credentials(&headers, None, None).unwrap().unwrap();
        assert_eq!(creds.client_id, "my:client");
        assert_eq!(creds.client_secret.as_deref(), Some("s3cret+value/x y%"));
    }

    #[test]
    fn malformed_basic_credentials_are_rejected() {
        for credentials in ["no-separator", "client:%FF%FE"] {
            let err = extract_credentials(&basic_header(credentials), Some("c"), None).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidClient);
        }

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert!(extract_credentials(&headers, Some("c"), None).is_err());
    }
}
