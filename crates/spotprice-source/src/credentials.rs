//! AWS credential resolution.
//!
//! [`CredentialsProvider::from_env`] walks the usual AWS chain, first match
//! wins:
//!
//! 1. `AWS_ACCESS_KEY_ID` + `AWS_SECRET_ACCESS_KEY` (+ `AWS_SESSION_TOKEN`)
//! 2. the `AWS_PROFILE` profile (default `default`) in the shared
//!    credentials file, then in the shared config file
//! 3. container credentials (`AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` or
//!    `AWS_CONTAINER_CREDENTIALS_FULL_URI`)
//! 4. the EC2 instance metadata service (IMDSv2), unless
//!    `AWS_EC2_METADATA_DISABLED=true`
//!
//! Remote credentials are cached and refetched shortly before they expire.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{SourceError, SourceResult};

const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_TTL_SECS: &str = "21600";
const CONTAINER_ENDPOINT: &str = "http://169.254.170.2";
const REMOTE_TIMEOUT: Duration = Duration::from_secs(2);

/// Minutes before expiry at which remote credentials are refetched.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// AWS access credentials.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.expiration
            .is_some_and(|expires| expires - TimeDelta::minutes(REFRESH_MARGIN_MINUTES) <= now)
    }
}

/// Where an [`Ec2Client`](crate::Ec2Client) gets its credentials.
pub struct CredentialsProvider {
    inner: Inner,
}

enum Inner {
    Fixed(Credentials),
    Remote(RemoteProvider),
}

struct RemoteProvider {
    http: reqwest::Client,
    endpoint: RemoteEndpoint,
    cached: Mutex<Option<Credentials>>,
}

enum RemoteEndpoint {
    InstanceMetadata { base: String },
    Container { url: String, authorization: Option<String> },
}

impl From<Credentials> for CredentialsProvider {
    fn from(credentials: Credentials) -> Self {
        Self::fixed(credentials)
    }
}

impl CredentialsProvider {
    pub fn fixed(credentials: Credentials) -> Self {
        Self {
            inner: Inner::Fixed(credentials),
        }
    }

    /// IMDSv2 rooted at `base` (normally `http://169.254.169.254`).
    pub fn instance_metadata(base: impl Into<String>) -> SourceResult<Self> {
        Self::remote(RemoteEndpoint::InstanceMetadata {
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    /// ECS/EKS-style container credentials endpoint.
    pub fn container(url: impl Into<String>, authorization: Option<String>) -> SourceResult<Self> {
        Self::remote(RemoteEndpoint::Container {
            url: url.into(),
            authorization,
        })
    }

    fn remote(endpoint: RemoteEndpoint) -> SourceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Config(format!("credentials http client: {e}")))?;
        Ok(Self {
            inner: Inner::Remote(RemoteProvider {
                http,
                endpoint,
                cached: Mutex::new(None),
            }),
        })
    }

    /// Resolve the credential chain from the process environment.
    pub fn from_env() -> SourceResult<Self> {
        Self::resolve(&|name: &str| std::env::var(name).ok())
    }

    fn resolve(env: &dyn Fn(&str) -> Option<String>) -> SourceResult<Self> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        if let Some(credentials) = static_credentials(&env)? {
            debug!(source = "environment", "AWS credentials resolved");
            return Ok(Self::fixed(credentials));
        }

        let profile = env("AWS_PROFILE").unwrap_or_else(|| "default".to_string());
        let home = env("HOME").map(PathBuf::from);
        let shared_file = |var: &str, default: &str| {
            env(var)
                .map(PathBuf::from)
                .or_else(|| home.as_ref().map(|h| h.join(".aws").join(default)))
        };
        let files = [
            (shared_file("AWS_SHARED_CREDENTIALS_FILE", "credentials"), ProfileFile::Credentials),
            (shared_file("AWS_CONFIG_FILE", "config"), ProfileFile::Config),
        ];
        for (path, kind) in files {
            let Some(path) = path else { continue };
            if let Some(credentials) = profile_credentials(&path, kind, &profile)? {
                debug!(source = "profile", %profile, path = %path.display(), "AWS credentials resolved");
                return Ok(Self::fixed(credentials));
            }
        }

        let authorization = env("AWS_CONTAINER_AUTHORIZATION_TOKEN");
        if let Some(relative) = env("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
            debug!(source = "container", "AWS credentials endpoint selected");
            return Self::container(format!("{CONTAINER_ENDPOINT}{relative}"), authorization);
        }
        if let Some(full) = env("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
            debug!(source = "container", "AWS credentials endpoint selected");
            return Self::container(full, authorization);
        }

        if env("AWS_EC2_METADATA_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            return Err(SourceError::Config(format!(
                "no AWS credentials found: environment and profile {profile:?} are empty \
                 and instance metadata is disabled"
            )));
        }
        let base = env("AWS_EC2_METADATA_SERVICE_ENDPOINT")
            .unwrap_or_else(|| IMDS_ENDPOINT.to_string());
        debug!(source = "instance-metadata", %base, "AWS credentials endpoint selected");
        Self::instance_metadata(base)
    }

    /// Current credentials, fetching or refreshing remote ones as needed.
    pub async fn credentials(&self) -> SourceResult<Credentials> {
        match &self.inner {
            Inner::Fixed(credentials) => Ok(credentials.clone()),
            Inner::Remote(remote) => remote.credentials().await,
        }
    }
}

impl RemoteProvider {
    async fn credentials(&self) -> SourceResult<Credentials> {
        let mut cached = self.cached.lock().await;
        if let Some(credentials) = cached.as_ref() {
            if !credentials.is_stale(Utc::now()) {
                return Ok(credentials.clone());
            }
        }
        let fresh = self.fetch().await?;
        debug!(expiration = ?fresh.expiration, "AWS credentials refreshed");
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    async fn fetch(&self) -> SourceResult<Credentials> {
        let body = match &self.endpoint {
            RemoteEndpoint::InstanceMetadata { base } => self.fetch_imds(base).await?,
            RemoteEndpoint::Container { url, authorization } => {
                let mut request = self.http.get(url);
                if let Some(token) = authorization {
                    request = request.header("authorization", token);
                }
                read_body(request, "container credentials").await?
            }
        };
        parse_remote_credentials(&body)
    }

    async fn fetch_imds(&self, base: &str) -> SourceResult<String> {
        let token = read_body(
            self.http
                .put(format!("{base}/latest/api/token"))
                .header("x-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECS),
            "instance metadata token",
        )
        .await?;

        let roles_url = format!("{base}/latest/meta-data/iam/security-credentials/");
        let roles = read_body(
            self.http
                .get(&roles_url)
                .header("x-aws-ec2-metadata-token", &token),
            "instance role",
        )
        .await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| SourceError::Auth("instance has no IAM role attached".to_string()))?;

        read_body(
            self.http
                .get(format!("{roles_url}{role}"))
                .header("x-aws-ec2-metadata-token", &token),
            "instance role credentials",
        )
        .await
    }
}

async fn read_body(request: reqwest::RequestBuilder, what: &str) -> SourceResult<String> {
    let response = request
        .send()
        .await
        .map_err(|e| SourceError::Unavailable(format!("{what}: {e}")))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| SourceError::Unavailable(format!("{what}: {e}")))?;
    match status.as_u16() {
        200..=299 => Ok(body),
        401 | 403 | 404 => Err(SourceError::Auth(format!("{what}: HTTP {status}"))),
        _ => Err(SourceError::Unavailable(format!("{what}: HTTP {status}"))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemoteCredentials {
    #[serde(default)]
    code: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expiration: Option<String>,
}

fn parse_remote_credentials(body: &str) -> SourceResult<Credentials> {
    let doc: RemoteCredentials = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("credentials document: {e}")))?;
    if let Some(code) = doc.code.as_deref() {
        if code != "Success" {
            return Err(SourceError::Auth(format!("credentials endpoint returned {code}")));
        }
    }
    let expiration = doc
        .expiration
        .as_deref()
        .map(|e| {
            DateTime::parse_from_rfc3339(e)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|err| {
                    SourceError::InvalidResponse(format!("credentials expiration {e:?}: {err}"))
                })
        })
        .transpose()?;
    Ok(Credentials {
        access_key_id: doc.access_key_id,
        secret_access_key: doc.secret_access_key,
        session_token: doc.token.filter(|t| !t.is_empty()),
        expiration,
    })
}

fn static_credentials(env: &dyn Fn(&str) -> Option<String>) -> SourceResult<Option<Credentials>> {
    match (env("AWS_ACCESS_KEY_ID"), env("AWS_SECRET_ACCESS_KEY")) {
        (Some(id), Some(secret)) => Ok(Some(Credentials {
            session_token: env("AWS_SESSION_TOKEN"),
            ..Credentials::new(id, secret)
        })),
        (Some(_), None) => Err(SourceError::Config(
            "AWS_ACCESS_KEY_ID is set but AWS_SECRET_ACCESS_KEY is not".to_string(),
        )),
        (None, Some(_)) => Err(SourceError::Config(
            "AWS_SECRET_ACCESS_KEY is set but AWS_ACCESS_KEY_ID is not".to_string(),
        )),
        (None, None) => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileFile {
    /// `~/.aws/credentials`: sections are bare profile names.
    Credentials,
    /// `~/.aws/config`: `[default]` or `[profile name]`.
    Config,
}

/// Static keys for `profile` in one shared file. A missing file or a
/// profile without keys (role or SSO profiles) yields `None`.
fn profile_credentials(
    path: &Path,
    kind: ProfileFile,
    profile: &str,
) -> SourceResult<Option<Credentials>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(SourceError::Config(format!("reading {}: {e}", path.display())));
        }
    };
    let profiles = parse_profiles(&text, kind);
    let Some(section) = profiles.get(profile) else {
        return Ok(None);
    };

    match (section.get("aws_access_key_id"), section.get("aws_secret_access_key")) {
        (Some(id), Some(secret)) => Ok(Some(Credentials {
            session_token: section.get("aws_session_token").cloned(),
            ..Credentials::new(id.clone(), secret.clone())
        })),
        (None, None) => Ok(None),
        _ => Err(SourceError::Config(format!(
            "profile {profile:?} in {} has only one of aws_access_key_id / aws_secret_access_key",
            path.display()
        ))),
    }
}

fn parse_profiles(text: &str, kind: ProfileFile) -> HashMap<String, HashMap<String, String>> {
    let mut profiles: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let header = header.trim();
            current = match kind {
                ProfileFile::Credentials => Some(header.to_string()),
                ProfileFile::Config if header == "default" => Some(header.to_string()),
                ProfileFile::Config => header
                    .strip_prefix("profile ")
                    .map(|name| name.trim().to_string()),
            };
            continue;
        }
        let (Some(name), Some((key, value))) = (current.as_ref(), line.split_once('=')) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        profiles
            .entry(name.clone())
            .or_default()
            .insert(key.trim().to_ascii_lowercase(), value.to_string());
    }
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, text: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path.display().to_string()
    }

    fn role_document(expiration: &str) -> String {
        format!(
            r#"{{"Code":"Success","LastUpdated":"2024-01-01T00:00:00Z","Type":"AWS-HMAC",
                "AccessKeyId":"ASIAROLE","SecretAccessKey":"role-secret",
                "Token":"role-token","Expiration":"{expiration}"}}"#
        )
    }

    #[tokio::test]
    async fn environment_keys_win() {
        let env = env_of(&[
            ("AWS_ACCESS_KEY_ID", "AKIDENV"),
            ("AWS_SECRET_ACCESS_KEY", "env-secret"),
            ("AWS_SESSION_TOKEN", "env-token"),
            ("AWS_SHARED_CREDENTIALS_FILE", "/nonexistent/credentials"),
        ]);
        let creds = CredentialsProvider::resolve(&env)
            .unwrap()
            .credentials()
            .await
            .unwrap();
        assert_eq!(creds.access_key_id, "AKIDENV");
        assert_eq!(creds.session_token.as_deref(), Some("env-token"));
    }

    #[test]
    fn half_set_environment_is_rejected() {
        let env = env_of(&[("AWS_ACCESS_KEY_ID", "AKIDENV")]);
        assert!(matches!(
            CredentialsProvider::resolve(&env),
            Err(SourceError::Config(_))
        ));
    }

    #[tokio::test]
    async fn named_profile_from_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "credentials",
            "[default]\naws_access_key_id = AKIDDEFAULT\naws_secret_access_key = d\n\n\
             # collector account\n[spot]\naws_access_key_id=AKIDSPOT\n\
             aws_secret_access_key = spot-secret\naws_session_token = spot-token\n",
        );
        let env = env_of(&[
            ("AWS_PROFILE", "spot"),
            ("AWS_SHARED_CREDENTIALS_FILE", path.as_str()),
            ("AWS_EC2_METADATA_DISABLED", "true"),
        ]);
        let creds = CredentialsProvider::resolve(&env)
            .unwrap()
            .credentials()
            .await
            .unwrap();
        assert_eq!(creds.access_key_id, "AKIDSPOT");
        assert_eq!(creds.secret_access_key, "spot-secret");
        assert_eq!(creds.session_token.as_deref(), Some("spot-token"));
    }

    #[tokio::test]
    async fn default_profile_found_under_home() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".aws")).unwrap();
        write_file(
            &dir,
            ".aws/credentials",
            "[default]\naws_access_key_id = AKIDHOME\naws_secret_access_key = home-secret\n",
        );
        let home = dir.path().display().to_string();
        let env = env_of(&[("HOME", home.as_str()), ("AWS_EC2_METADATA_DISABLED", "true")]);
        let creds = CredentialsProvider::resolve(&env)
            .unwrap()
            .credentials()
            .await
            .unwrap();
        assert_eq!(creds.access_key_id, "AKIDHOME");
    }

    #[tokio::test]
    async fn config_file_profile_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_file(
            &dir,
            "config",
            "[default]\nregion = us-east-1\n\n[profile spot]\nregion = eu-west-1\n\
             aws_access_key_id = AKIDCONFIG\naws_secret_access_key = config-secret\n",
        );
        let env = env_of(&[
            ("AWS_PROFILE", "spot"),
            ("AWS_SHARED_CREDENTIALS_FILE", "/nonexistent/credentials"),
            ("AWS_CONFIG_FILE", config.as_str()),
            ("AWS_EC2_METADATA_DISABLED", "true"),
        ]);
        let creds = CredentialsProvider::resolve(&env)
            .unwrap()
            .credentials()
            .await
            .unwrap();
        assert_eq!(creds.access_key_id, "AKIDCONFIG");
    }

    #[test]
    fn nothing_found_with_metadata_disabled_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "credentials", "[spot]\nrole_arn = arn:aws:iam::1:role/x\n");
        let env = env_of(&[
            ("AWS_PROFILE", "spot"),
            ("AWS_SHARED_CREDENTIALS_FILE", path.as_str()),
            ("AWS_EC2_METADATA_DISABLED", "true"),
        ]);
        let err = CredentialsProvider::resolve(&env).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn config_sections_need_profile_prefix() {
        let profiles = parse_profiles(
            "[default]\na = 1\n[profile x]\nb = 2\n[sso-session y]\nc = 3\n",
            ProfileFile::Config,
        );
        assert_eq!(profiles["default"]["a"], "1");
        assert_eq!(profiles["x"]["b"], "2");
        assert_eq!(profiles.len(), 2);
    }

    async fn mount_imds(server: &MockServer, document: String, expected_fetches: u64) {
        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .and(header("x-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECS))
            .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/"))
            .and(header("x-aws-ec2-metadata-token", "imds-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("spotprice-collector\n"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/spotprice-collector"))
            .and(header("x-aws-ec2-metadata-token", "imds-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(document))
            .expect(expected_fetches)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn instance_role_credentials_are_cached() {
        let server = MockServer::start().await;
        mount_imds(&server, role_document("2099-01-01T00:00:00Z"), 1).await;

        let endpoint = server.uri();
        let env = env_of(&[("AWS_EC2_METADATA_SERVICE_ENDPOINT", endpoint.as_str())]);
        let provider = CredentialsProvider::resolve(&env).unwrap();
        let first = provider.credentials().await.unwrap();
        let second = provider.credentials().await.unwrap();

        assert_eq!(first.access_key_id, "ASIAROLE");
        assert_eq!(first.session_token.as_deref(), Some("role-token"));
        assert_eq!(second.access_key_id, "ASIAROLE");
        assert!(first.expiration.is_some());
    }

    #[tokio::test]
    async fn expiring_role_credentials_are_refetched() {
        let server = MockServer::start().await;
        mount_imds(&server, role_document("2020-01-01T00:00:00Z"), 2).await;

        let provider = CredentialsProvider::instance_metadata(server.uri()).unwrap();
        provider.credentials().await.unwrap();
        provider.credentials().await.unwrap();
    }

    #[tokio::test]
    async fn instance_without_role_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/latest/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("imds-token"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/iam/security-credentials/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = CredentialsProvider::instance_metadata(server.uri()).unwrap();
        let err = provider.credentials().await.unwrap_err();
        assert!(matches!(err, SourceError::Auth(_)));
    }

    #[tokio::test]
    async fn container_endpoint_sends_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/credentials/task"))
            .and(header("authorization", "container-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"AccessKeyId":"ASIATASK","SecretAccessKey":"task-secret",
                    "Token":"task-token","Expiration":"2099-01-01T00:00:00Z"}"#,
            ))
            .mount(&server)
            .await;

        let full_uri = format!("{}/v2/credentials/task", server.uri());
        let env = env_of(&[
            ("AWS_CONTAINER_CREDENTIALS_FULL_URI", full_uri.as_str()),
            ("AWS_CONTAINER_AUTHORIZATION_TOKEN", "container-secret"),
        ]);
        let creds = CredentialsProvider::resolve(&env)
            .unwrap()
            .credentials()
            .await
            .unwrap();
        assert_eq!(creds.access_key_id, "ASIATASK");
        assert_eq!(creds.session_token.as_deref(), Some("task-token"));
    }

    #[test]
    fn failed_role_document_is_auth_error() {
        let body = r#"{"Code":"AssumeRoleUnauthorizedAccess","AccessKeyId":"","SecretAccessKey":""}"#;
        assert!(matches!(
            parse_remote_credentials(body),
            Err(SourceError::Auth(_))
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let creds = Credentials::new("AKID", "super-secret").with_session_token("tok-secret");
        let printed = format!("{creds:?}");
        assert!(printed.contains("AKID"));
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("tok-secret"));
    }
}
