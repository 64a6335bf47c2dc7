//! Irreversible removal of an account and everything it uploaded.
//!
//! Order matters: blobs go first because the identity delete cascades every
//! row that still points at them. Once rows are gone, nothing can tell which
//! objects were orphaned.

use std::sync::Arc;

use serde::Deserialize;

use crate::backend::{
    AdminAuth, BackendError, Identity, ObjectStore, RelationalStore, Select,
    SessionAuth, string_or_number,
};
use crate::config::{Buckets, CleanupPolicy};
use crate::storage_path::path_from_url;

pub type Result<T> = std::result::Result<T, DeletionError>;

pub const SUCCESS_MESSAGE: &str =
    "Account and associated files deleted successfully.";

const PROFILES_TABLE: &str = "users";
const POSTS_TABLE: &str = "posts";

/// Failures aborting an account deletion.
#[derive(Debug, thiserror::Error)]
pub enum DeletionError {
    #[error("Authentication failed.")]
    Authentication(#[source] BackendError),

    #[error("Error fetching user {what}.")]
    Lookup {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Failed to delete files from `{bucket}`.")]
    StorageDelete {
        bucket: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to delete user.")]
    IdentityDelete(#[source] BackendError),
}

impl DeletionError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DeletionError::Authentication(_) => "authentication",
            DeletionError::Lookup { .. } => "lookup",
            DeletionError::StorageDelete { .. } => "storage_delete",
            DeletionError::IdentityDelete(_) => "identity_delete",
        }
    }
}

/// Application-level profile row.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Profile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostImage {
    #[serde(default)]
    imgurl: Option<String>,
}

/// What a successful deletion did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub identity: String,
    pub had_profile: bool,
    pub avatar_paths: Vec<String>,
    pub post_paths: Vec<String>,
    /// References no matcher could reverse.
    pub unresolved: usize,
    /// Buckets whose cleanup failed under [`CleanupPolicy::BestEffort`].
    pub failed_buckets: Vec<String>,
}

/// Privileged collaborators of the orchestrator.
#[derive(Clone)]
pub struct Privileged {
    pub auth: Arc<dyn AdminAuth>,
    pub store: Arc<dyn RelationalStore>,
    pub objects: Arc<dyn ObjectStore>,
}

/// Account deletion orchestrator.
#[derive(Clone)]
pub struct AccountDeletion {
    privileged: Privileged,
    buckets: Buckets,
    policy: CleanupPolicy,
}

impl AccountDeletion {
    /// Create a new [`AccountDeletion`].
    pub fn new(
        privileged: Privileged,
        buckets: Buckets,
        policy: CleanupPolicy,
    ) -> Self {
        Self {
            privileged,
            buckets,
            policy,
        }
    }

    /// Delete the account behind `session`.
    ///
    /// The identity always comes from the session, never from the request.
    pub async fn execute(
        &self,
        session: &dyn SessionAuth,
    ) -> Result<DeletionReport> {
        let Identity { id, .. } = session
            .current_user()
            .await
            .map_err(DeletionError::Authentication)?;

        let mut report = DeletionReport {
            identity: id.clone(),
            ..Default::default()
        };

        let profile = self.find_profile(&id).await?;
        let images = match &profile {
            Some(profile) => self.post_images(&profile.id).await?,
            None => Vec::new(),
        };
        report.had_profile = profile.is_some();

        let avatar = profile.and_then(|p| p.avatar);
        let avatar_paths =
            self.resolve(avatar.iter(), &self.buckets.avatars, &mut report);
        let post_paths =
            self.resolve(images.iter(), &self.buckets.posts, &mut report);

        self.remove_blobs(&self.buckets.avatars, &avatar_paths, &mut report)
            .await?;
        self.remove_blobs(&self.buckets.posts, &post_paths, &mut report)
            .await?;
        report.avatar_paths = avatar_paths;
        report.post_paths = post_paths;

        // Cascades to the profile, posts, comments and likes.
        match self.privileged.auth.delete_user(&id).await {
            Ok(()) => {},
            Err(BackendError::NotFound) => {
                tracing::warn!(identity = %id, "identity already deleted");
            },
            Err(err) => return Err(DeletionError::IdentityDelete(err)),
        }

        // The token died with the identity, failure is expected.
        if let Err(err) = session.sign_out().await {
            tracing::debug!(
                identity = %id,
                error = %err,
                "session teardown failed after deletion"
            );
        }

        Ok(report)
    }

    async fn find_profile(&self, identity: &str) -> Result<Option<Profile>> {
        let lookup = |source| DeletionError::Lookup {
            what: "profile",
            source,
        };

        let rows = self
            .privileged
            .store
            .select(
                &Select::from(PROFILES_TABLE)
                    .columns(&["id", "avatar"])
                    .eq("user_id", identity),
            )
            .await
            .map_err(lookup)?;

        match rows.len() {
            0 => Ok(None),
            1 => {
                let row = rows.into_iter().next().unwrap_or_default();
                serde_json::from_value(row)
                    .map(Some)
                    .map_err(|err| lookup(err.into()))
            },
            // Same answer as a single-row request would get.
            n => Err(lookup(BackendError::Status {
                status: 406,
                message: format!("{n} profile rows for one identity"),
            })),
        }
    }

    async fn post_images(&self, profile_id: &str) -> Result<Vec<String>> {
        let lookup = |source| DeletionError::Lookup {
            what: "posts",
            source,
        };

        let rows = self
            .privileged
            .store
            .select(
                &Select::from(POSTS_TABLE)
                    .columns(&["imgurl"])
                    .eq("user_id", profile_id),
            )
            .await
            .map_err(lookup)?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<PostImage>(row)
                    .map(|post| post.imgurl)
                    .map_err(|err| lookup(err.into()))
            })
            .filter_map(|post| post.transpose())
            .collect()
    }

    fn resolve<'a>(
        &self,
        references: impl Iterator<Item = &'a String>,
        bucket: &str,
        report: &mut DeletionReport,
    ) -> Vec<String> {
        references
            .filter_map(|reference| {
                let path = path_from_url(reference, bucket);
                if path.is_none() {
                    tracing::warn!(%bucket, %reference, "cannot resolve storage path");
                    report.unresolved += 1;
                }
                path
            })
            .collect()
    }

    async fn remove_blobs(
        &self,
        bucket: &str,
        paths: &[String],
        report: &mut DeletionReport,
    ) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        match self.privileged.objects.remove(bucket, paths).await {
            Ok(()) => {
                metrics::counter!("storage_objects_removed_total", "bucket" => bucket.to_owned())
                    .increment(paths.len() as u64);
                Ok(())
            },
            Err(err) if self.policy == CleanupPolicy::BestEffort => {
                tracing::warn!(
                    identity = %report.identity,
                    %bucket,
                    error = %err,
                    "failed to delete files, continuing"
                );
                report.failed_buckets.push(bucket.to_owned());
                Ok(())
            },
            Err(err) => {
                tracing::error!(
                    identity = %report.identity,
                    %bucket,
                    error = %err,
                    "failed to delete files"
                );
                Err(DeletionError::StorageDelete {
                    bucket: bucket.to_owned(),
                    source: err,
                })
            },
        }
    }
}
