use thiserror::Error;

/// User-facing category of an update failure.
///
/// The release channel only reports free text, so the category is picked by
/// matching substrings of the lowercased message. Treat it as display text,
/// not as something to branch program logic on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateErrorKind {
    Network,
    Signature,
    NoPlatformPackage,
    NoReleaseMetadata,
    InsecureEndpoint,
    EndpointNotConfigured,
    Install,
    Restart,
    Unknown,
}

impl UpdateErrorKind {
    pub fn classify(raw: &str) -> Self {
        let m = raw.to_lowercase();
        let has = |needle: &str| m.contains(needle);

        if has("network") || has("timed out") || has("dns") || has("status:") || has("failed to send request") {
            UpdateErrorKind::Network
        } else if has("signature") || has("minisign") {
            UpdateErrorKind::Signature
        } else if has("target") && has("not found") {
            UpdateErrorKind::NoPlatformPackage
        } else if has("release not found") {
            UpdateErrorKind::NoReleaseMetadata
        } else if has("insecure transport protocol") {
            UpdateErrorKind::InsecureEndpoint
        } else if has("updater does not have any endpoints") {
            UpdateErrorKind::EndpointNotConfigured
        } else if has("install") {
            UpdateErrorKind::Install
        } else if has("restart") || has("relaunch") {
            UpdateErrorKind::Restart
        } else {
            UpdateErrorKind::Unknown
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            UpdateErrorKind::Network => "Unable to connect to the update server.",
            UpdateErrorKind::Signature => "Update signature verification failed.",
            UpdateErrorKind::NoPlatformPackage => "No update package is available for this platform.",
            UpdateErrorKind::NoReleaseMetadata => "No stable release metadata is available.",
            UpdateErrorKind::InsecureEndpoint => "Update endpoint must use HTTPS in release mode.",
            UpdateErrorKind::EndpointNotConfigured => "Update endpoint is not configured.",
            UpdateErrorKind::Install => "Failed to install the downloaded update.",
            UpdateErrorKind::Restart => "Update installed but failed to restart the app.",
            UpdateErrorKind::Unknown => "Update failed. Please try again later.",
        }
    }
}

/// Error returned by every [`super::UpdateManager`] operation. `Clone` so that
/// coalesced callers can all receive the same failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("{}", .kind.user_message())]
    Classified { kind: UpdateErrorKind, details: String },
    #[error("No update is available to download.")]
    NoUpdateAvailable,
    #[error("No downloaded update is ready to install.")]
    NothingToInstall,
    #[error("An update is already downloading.")]
    DownloadInProgress,
    #[error("An update check is already running.")]
    CheckInProgress,
}

impl UpdateError {
    pub fn classify(err: &anyhow::Error) -> Self {
        let details = format!("{err:#}");
        UpdateError::Classified { kind: UpdateErrorKind::classify(&details), details }
    }

    pub fn kind(&self) -> Option<UpdateErrorKind> {
        match self {
            UpdateError::Classified { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
