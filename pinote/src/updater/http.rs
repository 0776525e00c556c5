/// Release channel backed by a static JSON manifest served over HTTPS:
///
/// ```json
/// {
///   "version": "1.2.0",
///   "notes": "Bug fixes",
///   "pub_date": "2026-10-01T12:00:00Z",
///   "platforms": {
///     "windows-x86_64": { "url": "https://…/Pinote_1.2.0_x64-setup.exe", "signature": "…" },
///     "darwin-aarch64": { "url": "https://…/Pinote_1.2.0_aarch64.dmg", "signature": "…" }
///   }
/// }
/// ```
///
/// `signature` is the base64-encoded minisign signature of the package. A
/// package is only handed to the OS after it verifies against the configured
/// public key.
///
/// `ureq` is blocking, so every request runs on tokio's blocking pool.
use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use futures::future::{BoxFuture, FutureExt};
use minisign_verify::{PublicKey, Signature};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::channel::{DownloadEvent, PendingUpdate, ProgressFn, ReleaseChannel, ReleaseInfo};
use crate::config::UpdaterConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct ReleaseManifest {
    version: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    platforms: HashMap<String, PlatformAsset>,
}

#[derive(Debug, Deserialize)]
struct PlatformAsset {
    url: String,
    #[serde(default)]
    signature: Option<String>,
}

pub struct HttpReleaseChannel {
    endpoints: Vec<String>,
    allow_insecure: bool,
    pubkey: Option<String>,
    download_dir: PathBuf,
    current_version: String,
    agent: ureq::Agent,
}

impl HttpReleaseChannel {
    pub fn new(config: &UpdaterConfig, download_dir: PathBuf) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Self {
            endpoints: config.endpoints.clone(),
            allow_insecure: config.allow_insecure,
            pubkey: config.pubkey.clone(),
            download_dir,
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            agent,
        }
    }

    fn validate_endpoints(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            bail!("updater does not have any endpoints set");
        }
        let secure_required = !self.allow_insecure && !cfg!(debug_assertions);
        if secure_required {
            if let Some(url) = self.endpoints.iter().find(|u| !u.starts_with("https://")) {
                bail!("insecure transport protocol: {url}");
            }
        }
        Ok(())
    }

    fn fetch_manifest(agent: &ureq::Agent, url: &str) -> Result<ReleaseManifest> {
        let mut response = agent.get(url).call().map_err(|e| request_error(url, e))?;
        response
            .body_mut()
            .read_json::<ReleaseManifest>()
            .with_context(|| format!("release not found: malformed manifest at {url}"))
    }

    fn check_blocking(
        agent: ureq::Agent,
        endpoints: Vec<String>,
        current_version: String,
        pubkey: Option<String>,
        download_dir: PathBuf,
    ) -> Result<Option<Arc<dyn PendingUpdate>>> {
        let mut last_error = None;
        for url in &endpoints {
            let manifest = match Self::fetch_manifest(&agent, url) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(endpoint = %url, error = %format!("{e:#}"), "update_endpoint_failed");
                    last_error = Some(e);
                    continue;
                }
            };

            if !is_newer(&manifest.version, &current_version) {
                return Ok(None);
            }

            let target = target_key();
            let Some(asset) = manifest.platforms.get(&target) else {
                bail!("target {target} not found in release manifest");
            };

            let file_name = package_file_name(&asset.url, &manifest.version);
            let update = HttpPendingUpdate {
                info: ReleaseInfo {
                    current_version: Some(current_version),
                    version: manifest.version,
                    notes: manifest.notes,
                },
                url: asset.url.clone(),
                signature: asset.signature.clone(),
                pubkey,
                package_path: download_dir.join(file_name),
                agent,
            };
            return Ok(Some(Arc::new(update)));
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("release not found")))
    }
}

impl ReleaseChannel for HttpReleaseChannel {
    fn current_version(&self) -> BoxFuture<'_, Result<String>> {
        futures::future::ready(Ok(self.current_version.clone())).boxed()
    }

    fn check(&self) -> BoxFuture<'_, Result<Option<Arc<dyn PendingUpdate>>>> {
        async move {
            self.validate_endpoints()?;
            let agent = self.agent.clone();
            let endpoints = self.endpoints.clone();
            let current = self.current_version.clone();
            let pubkey = self.pubkey.clone();
            let dir = self.download_dir.clone();
            tokio::task::spawn_blocking(move || Self::check_blocking(agent, endpoints, current, pubkey, dir))
                .await
                .context("update check task panicked")?
        }
        .boxed()
    }
}

struct HttpPendingUpdate {
    info: ReleaseInfo,
    url: String,
    signature: Option<String>,
    pubkey: Option<String>,
    package_path: PathBuf,
    agent: ureq::Agent,
}

impl HttpPendingUpdate {
    fn download_blocking(agent: ureq::Agent, url: String, path: PathBuf, on_event: ProgressFn) -> Result<()> {
        let mut response = agent.get(&url).call().map_err(|e| request_error(&url, e))?;
        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create download directory {}", parent.display()))?;
        }
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create update package {}", path.display()))?;

        on_event(DownloadEvent::Started { content_length });
        let mut reader = response.body_mut().as_reader();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).context("network error while downloading update")?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .with_context(|| format!("Failed to write update package {}", path.display()))?;
            on_event(DownloadEvent::Progress { chunk_length: n as u64 });
        }
        file.flush()?;
        on_event(DownloadEvent::Finished);
        Ok(())
    }
}

impl PendingUpdate for HttpPendingUpdate {
    fn info(&self) -> &ReleaseInfo {
        &self.info
    }

    /// Downloads the package and verifies its signature. A package that fails
    /// verification is deleted.
    fn download(&self, on_event: ProgressFn) -> BoxFuture<'_, Result<()>> {
        async move {
            let agent = self.agent.clone();
            let url = self.url.clone();
            let path = self.package_path.clone();
            let signature = self.signature.clone();
            let pubkey = self.pubkey.clone();
            tokio::task::spawn_blocking(move || {
                Self::download_blocking(agent, url, path.clone(), on_event)?;
                if let Err(e) = verify_package(&path, signature.as_deref(), pubkey.as_deref()) {
                    let _ = std::fs::remove_file(&path);
                    return Err(e);
                }
                tracing::info!(package = %path.display(), "update_signature_verified");
                Ok(())
            })
            .await
            .context("update download task panicked")?
        }
        .boxed()
    }

    /// Re-verifies the package, then hands it to the OS (installer, disk
    /// image, …).
    fn install(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let path = self.package_path.clone();
            if !path.exists() {
                bail!("install failed: update package {} is missing", path.display());
            }
            let signature = self.signature.clone();
            let pubkey = self.pubkey.clone();
            tokio::task::spawn_blocking(move || {
                verify_package(&path, signature.as_deref(), pubkey.as_deref())?;
                open::that(&path).context("failed to install update package")
            })
            .await
            .context("install task panicked")?
        }
        .boxed()
    }
}

/// Checks `package` against a base64-encoded minisign `signature` made by the
/// base64-encoded minisign `pubkey`.
fn verify_package(package: &Path, signature: Option<&str>, pubkey: Option<&str>) -> Result<()> {
    let pubkey = pubkey.ok_or_else(|| anyhow!("update signature cannot be verified: no public key configured"))?;
    let signature = signature.ok_or_else(|| anyhow!("update signature missing from release manifest"))?;
    let data = std::fs::read(package)
        .with_context(|| format!("install failed: cannot read update package {}", package.display()))?;
    verify_signature(&data, signature, pubkey)
}

fn verify_signature(data: &[u8], signature: &str, pubkey: &str) -> Result<()> {
    let key_text = decode_base64_text(pubkey).context("invalid minisign public key")?;
    let public_key =
        PublicKey::decode(&key_text).map_err(|e| anyhow!("invalid minisign public key: {e}"))?;
    let signature_text = decode_base64_text(signature).context("invalid update signature encoding")?;
    let signature =
        Signature::decode(&signature_text).map_err(|e| anyhow!("invalid update signature: {e}"))?;
    public_key
        .verify(data, &signature, true)
        .map_err(|e| anyhow!("update signature verification failed: {e}"))
}

fn decode_base64_text(encoded: &str) -> Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    Ok(String::from_utf8(bytes)?)
}

fn request_error(url: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::StatusCode(404) => anyhow::anyhow!("release not found at {url}"),
        ureq::Error::StatusCode(code) => anyhow::anyhow!("unexpected status: {code} from {url}"),
        other => anyhow::anyhow!("network error requesting {url}: {other}"),
    }
}

/// `<os>-<arch>` key used in the manifest's `platforms` table.
fn target_key() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    format!("{os}-{}", std::env::consts::ARCH)
}

fn package_file_name(url: &str, version: &str) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty());
    match last {
        Some(name) => Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("pinote-{version}")),
        None => format!("pinote-{version}"),
    }
}

fn version_parts(v: &str) -> Vec<u64> {
    v.trim()
        .trim_start_matches('v')
        .split(['-', '+'])
        .next()
        .unwrap_or_default()
        .split('.')
        .map(|p| p.parse().unwrap_or(0))
        .collect()
}

/// True if `candidate` is a strictly higher `major.minor.patch` than `current`.
fn is_newer(candidate: &str, current: &str) -> bool {
    let a = version_parts(candidate);
    let b = version_parts(current);
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x > y;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::UpdateErrorKind;

    #[test]
    fn is_newer_compares_numerically() {
        assert!(is_newer("1.10.0", "1.9.9"));
        assert!(is_newer("v2.0.0", "1.99.0"));
        assert!(is_newer("1.0.1", "1.0"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("1.0.0-beta", "1.0.0"));
        assert!(!is_newer("0.9.0", "1.0.0"));
    }

    #[test]
    fn target_key_uses_darwin_for_macos() {
        let key = target_key();
        assert!(key.ends_with(std::env::consts::ARCH));
        assert!(!key.starts_with("macos"));
    }

    #[test]
    fn package_file_name_from_url() {
        assert_eq!(
            package_file_name("https://x.test/dl/Pinote_1.2.0_x64-setup.exe?sig=abc", "1.2.0"),
            "Pinote_1.2.0_x64-setup.exe"
        );
        assert_eq!(package_file_name("https://x.test/", "1.2.0"), "pinote-1.2.0");
    }

    #[test]
    fn manifest_parses_with_optional_fields() {
        let m: ReleaseManifest = serde_json::from_str(
            r#"{"version":"1.2.0","pub_date":"2026-10-01T12:00:00Z",
                "platforms":{"linux-x86_64":{"url":"https://x.test/p.AppImage","signature":"abc"},
                             "windows-x86_64":{"url":"https://x.test/setup.exe"}}}"#,
        )
        .unwrap();
        assert_eq!(m.version, "1.2.0");
        assert!(m.notes.is_none());
        assert_eq!(m.platforms["linux-x86_64"].url, "https://x.test/p.AppImage");
        assert_eq!(m.platforms["linux-x86_64"].signature.as_deref(), Some("abc"));
        assert!(m.platforms["windows-x86_64"].signature.is_none());
    }

    #[tokio::test]
    async fn check_without_endpoints_is_classified_as_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let channel = HttpReleaseChannel::new(&UpdaterConfig::default(), dir.path().to_path_buf());
        let err = channel.check().await.err().unwrap();
        assert_eq!(
            UpdateErrorKind::classify(&format!("{err:#}")),
            UpdateErrorKind::EndpointNotConfigured
        );
    }

    #[test]
    fn request_errors_are_phrased_for_classification() {
        let not_found = request_error("https://x.test/latest.json", ureq::Error::StatusCode(404));
        assert_eq!(
            UpdateErrorKind::classify(&not_found.to_string()),
            UpdateErrorKind::NoReleaseMetadata
        );
        let server = request_error("https://x.test/latest.json", ureq::Error::StatusCode(503));
        assert_eq!(UpdateErrorKind::classify(&server.to_string()), UpdateErrorKind::Network);
    }

    #[tokio::test]
    async fn current_version_is_package_version() {
        let dir = tempfile::tempdir().unwrap();
        let config = UpdaterConfig { endpoints: vec!["https://x.test".into()], ..Default::default() };
        let channel = HttpReleaseChannel::new(&config, dir.path().to_path_buf());
        assert_eq!(channel.current_version().await.unwrap(), env!("CARGO_PKG_VERSION"));
    }

    // ── signature verification ────────────────────────────────────────────────

    /// Minisign public key file, base64-encoded as it appears in `pinote.toml`.
    const TEST_PUBKEY: &str = "dW50cnVzdGVkIGNvbW1lbnQ6IG1pbmlzaWduIHB1YmxpYyBrZXkgNTA0OTRFNEY1NDQ1MDAwMQpSV1JRU1U1UFZFVUFBUU9oQjcvenpoQytIWERkR09kTHdKbG41Tll3bTZVTlh4M2NobVFTVlRHNAo=";
    /// Prehashed minisign signature of [`SIGNED_PACKAGE`], base64-encoded as it
    /// appears in the release manifest.
    const TEST_SIGNATURE: &str = "dW50cnVzdGVkIGNvbW1lbnQ6IHNpZ25hdHVyZSBmcm9tIG1pbmlzaWduIHNlY3JldCBrZXkKUlVSUVNVNVBWRVVBQVFWZ1FreUtGeW1od3BQSy80bkhxSXkwek8yZUlrZk5KTEk2ZTljSDltV1dSTWg1dzQrTy82ajNQR1kxT3dQQmxUdUNaVmQyQnNXS1d5MkZNY2lud0FBPQp0cnVzdGVkIGNvbW1lbnQ6IHRpbWVzdGFtcDoxNzYwMDAwMDAwCWZpbGU6cGlub3RlLTAuMi4wLmJpbgpNY2NBVmp0YnRrUnkyVi8wNXBJZHczbTB4VjA2RDFDK1A5UzFUYXR6aEl0cXlTT09ZbmEvSWU3MnI2c3pIWGVyOVdibnZlTUdlbDdibG9SKzFKcjJBZz09Cg==";
    const SIGNED_PACKAGE: &[u8] = b"pinote-0.2.0 package bytes\n";

    fn package_with(contents: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pinote-0.2.0.bin");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn signature_kind(err: &anyhow::Error) -> UpdateErrorKind {
        UpdateErrorKind::classify(&format!("{err:#}"))
    }

    #[test]
    fn signed_package_verifies() {
        let (_dir, path) = package_with(SIGNED_PACKAGE);
        verify_package(&path, Some(TEST_SIGNATURE), Some(TEST_PUBKEY)).unwrap();
    }

    #[test]
    fn tampered_package_fails_signature_check() {
        let mut tampered = SIGNED_PACKAGE.to_vec();
        tampered[0] ^= 0x01;
        let (_dir, path) = package_with(&tampered);
        let err = verify_package(&path, Some(TEST_SIGNATURE), Some(TEST_PUBKEY)).unwrap_err();
        assert_eq!(signature_kind(&err), UpdateErrorKind::Signature);
    }

    #[test]
    fn missing_signature_or_key_is_a_signature_failure() {
        let (_dir, path) = package_with(SIGNED_PACKAGE);
        let no_sig = verify_package(&path, None, Some(TEST_PUBKEY)).unwrap_err();
        assert_eq!(signature_kind(&no_sig), UpdateErrorKind::Signature);
        let no_key = verify_package(&path, Some(TEST_SIGNATURE), None).unwrap_err();
        assert_eq!(signature_kind(&no_key), UpdateErrorKind::Signature);
    }

    #[test]
    fn garbage_signature_is_a_signature_failure() {
        let (_dir, path) = package_with(SIGNED_PACKAGE);
        let err = verify_package(&path, Some("not base64!"), Some(TEST_PUBKEY)).unwrap_err();
        assert_eq!(signature_kind(&err), UpdateErrorKind::Signature);
        let err = verify_package(&path, Some(TEST_SIGNATURE), Some("bm9wZQ==")).unwrap_err();
        assert_eq!(signature_kind(&err), UpdateErrorKind::Signature);
    }

    #[tokio::test]
    async fn install_refuses_unverified_package() {
        let mut tampered = SIGNED_PACKAGE.to_vec();
        tampered.push(b'!');
        let (_dir, path) = package_with(&tampered);
        let update = HttpPendingUpdate {
            info: ReleaseInfo { current_version: None, version: "0.2.0".into(), notes: None },
            url: "https://x.test/pinote-0.2.0.bin".into(),
            signature: Some(TEST_SIGNATURE.into()),
            pubkey: Some(TEST_PUBKEY.into()),
            package_path: path,
            agent: ureq::Agent::new_with_defaults(),
        };
        let err = update.install().await.unwrap_err();
        assert_eq!(signature_kind(&err), UpdateErrorKind::Signature);
    }
}
