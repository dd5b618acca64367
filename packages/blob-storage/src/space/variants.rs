use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use object_storage::keys::new_physical_key;
use object_storage::retry::random_pause;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::BlobStorageSpace;
use crate::entity::{blob, variant};
use crate::error::BlobStorageError;

/// Upper bound of the random pause after losing a variant claim.
const CLAIM_RETRY_PAUSE_MS: u64 = 150;

/// Produces the bytes of a named variant from a blob's content.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, blob: &blob::Model, input: Vec<u8>) -> anyhow::Result<Vec<u8>>;
}

impl BlobStorageSpace {
    /// The winning row of `(blob, variant_name)`, converted or not.
    pub async fn find_variant(
        &self,
        blob: &blob::Model,
        variant_name: &str,
    ) -> Result<Option<variant::Model>, BlobStorageError> {
        Ok(variant::Entity::find()
            .filter(variant::Column::BlobId.eq(blob.id))
            .filter(variant::Column::VariantName.eq(variant_name))
            .order_by_asc(variant::Column::Id)
            .one(&self.db)
            .await?)
    }

    /// Physical key of the converted variant, converting it on demand.
    ///
    /// Returns `None` while a conversion running elsewhere has not finished
    /// within the configured number of checks.
    pub async fn resolve_variant(
        &self,
        blob_key: &str,
        variant_name: &str,
    ) -> Result<Option<String>, BlobStorageError> {
        let blob = self
            .find_by_blob_key(blob_key)
            .await?
            .ok_or_else(|| BlobStorageError::UnknownBlob(blob_key.to_string()))?;
        let max_attempts = self.limits.max_conversion_attempts;
        let mut checks_left = self.limits.max_conversion_wait_attempts;

        loop {
            let existing = self.find_variant(&blob, variant_name).await?;

            match existing {
                Some(found) if found.physical_object_key.is_some() => {
                    return Ok(found.physical_object_key);
                }
                Some(found) if !found.queued_for_conversion && found.num_attempts >= max_attempts => {
                    return Err(BlobStorageError::ExhaustedConversionAttempts {
                        blob_key: blob.blob_key.clone(),
                        variant: variant_name.to_string(),
                    });
                }
                None => {
                    self.ensure_conversion_possible(&blob, variant_name)?;
                    let created = self.create_variant(&blob, variant_name).await?;
                    if self.detect_and_remove_duplicate_variant(&created).await? {
                        random_pause(CLAIM_RETRY_PAUSE_MS).await;
                    } else {
                        self.convert(&blob, &created).await;
                        continue;
                    }
                }
                Some(found) if !self.should_retry_conversion(&found) => {
                    tokio::time::sleep(Duration::from_millis(self.limits.conversion_retry_delay_ms))
                        .await;
                }
                Some(found)
                    if self.settings.conversion_enabled && found.num_attempts < max_attempts =>
                {
                    self.ensure_conversion_possible(&blob, variant_name)?;
                    if self.mark_conversion_attempt(&found).await? {
                        let claimed = variant::Model {
                            num_attempts: found.num_attempts + 1,
                            ..found
                        };
                        self.convert(&blob, &claimed).await;
                        continue;
                    }
                    random_pause(CLAIM_RETRY_PAUSE_MS).await;
                }
                Some(_) => return Ok(None),
            }

            if checks_left == 0 {
                debug!(space = %self.name, blob_key, variant_name, "Variant is not available yet");
                return Ok(None);
            }
            checks_left -= 1;
        }
    }

    /// Bytes of the converted variant; `None` while it is still pending.
    pub async fn download_variant(
        &self,
        blob_key: &str,
        variant_name: &str,
    ) -> Result<Option<Vec<u8>>, BlobStorageError> {
        match self.resolve_variant(blob_key, variant_name).await? {
            Some(key) => Ok(self.physical.download(&key).await?),
            None => Ok(None),
        }
    }

    fn ensure_conversion_possible(
        &self,
        blob: &blob::Model,
        variant_name: &str,
    ) -> Result<(), BlobStorageError> {
        if !self.settings.conversion_enabled {
            return Err(BlobStorageError::ConversionDisabled {
                blob_key: blob.blob_key.clone(),
                variant: variant_name.to_string(),
            });
        }
        if !self.converters.contains_key(variant_name) {
            return Err(BlobStorageError::UnknownVariant(variant_name.to_string()));
        }
        Ok(())
    }

    /// A queued variant is left alone unless its last attempt is hanging.
    fn should_retry_conversion(&self, found: &variant::Model) -> bool {
        if !found.queued_for_conversion {
            return true;
        }
        let hanging = chrono::Duration::seconds(self.limits.hanging_conversion_retry_secs as i64);
        Utc::now() - found.last_conversion_attempt > hanging
    }

    /// Insert a variant row which is already queued and counts as the first attempt.
    pub async fn create_variant(
        &self,
        blob: &blob::Model,
        variant_name: &str,
    ) -> Result<variant::Model, BlobStorageError> {
        let now = Utc::now();
        Ok(variant::ActiveModel {
            id: Set(Uuid::now_v7()),
            blob_id: Set(blob.id),
            variant_name: Set(variant_name.to_string()),
            physical_object_key: Set(None),
            size: Set(0),
            queued_for_conversion: Set(true),
            num_attempts: Set(1),
            last_conversion_attempt: Set(now),
            node: Set(Some(self.node.clone())),
            conversion_duration_ms: Set(0),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await?)
    }

    /// Removes `created` if any other row for the same blob and variant exists.
    /// Returns whether it was removed.
    ///
    /// Ids from different nodes are not ordered, so the new row always yields.
    /// When two creators remove each other, both retry after a random pause.
    pub async fn detect_and_remove_duplicate_variant(
        &self,
        created: &variant::Model,
    ) -> Result<bool, BlobStorageError> {
        let other = variant::Entity::find()
            .filter(variant::Column::BlobId.eq(created.blob_id))
            .filter(variant::Column::VariantName.eq(created.variant_name.as_str()))
            .filter(variant::Column::Id.ne(created.id))
            .one(&self.db)
            .await?;

        if other.is_none() {
            return Ok(false);
        }

        variant::Entity::delete_by_id(created.id).exec(&self.db).await?;
        Ok(true)
    }

    /// Claims the next conversion attempt. Only one caller per observed
    /// `num_attempts` value succeeds.
    pub async fn mark_conversion_attempt(
        &self,
        found: &variant::Model,
    ) -> Result<bool, BlobStorageError> {
        let result = variant::Entity::update_many()
            .col_expr(variant::Column::NumAttempts, Expr::value(found.num_attempts + 1))
            .col_expr(variant::Column::QueuedForConversion, Expr::value(true))
            .col_expr(variant::Column::LastConversionAttempt, Expr::value(Utc::now()))
            .col_expr(variant::Column::Node, Expr::value(Some(self.node.clone())))
            .filter(variant::Column::Id.eq(found.id))
            .filter(variant::Column::NumAttempts.eq(found.num_attempts))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn convert(&self, blob: &blob::Model, claimed: &variant::Model) {
        let started = Instant::now();
        let outcome = self.run_converter(blob, &claimed.variant_name).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let recorded = match outcome {
            Ok((physical_key, size)) => {
                info!(
                    space = %self.name,
                    blob_key = %blob.blob_key,
                    variant = %claimed.variant_name,
                    duration_ms,
                    "Converted variant"
                );
                self.mark_conversion_success(claimed, &physical_key, size, duration_ms)
                    .await
            }
            Err(e) => {
                warn!(
                    space = %self.name,
                    blob_key = %blob.blob_key,
                    variant = %claimed.variant_name,
                    attempt = claimed.num_attempts,
                    error = %e,
                    "Variant conversion failed"
                );
                self.mark_conversion_failure(claimed, duration_ms).await
            }
        };

        if let Err(e) = recorded {
            warn!(variant_id = %claimed.id, error = %e, "Failed to record conversion outcome");
        }
    }

    async fn run_converter(
        &self,
        blob: &blob::Model,
        variant_name: &str,
    ) -> anyhow::Result<(String, usize)> {
        let converter = self
            .converters
            .get(variant_name)
            .ok_or_else(|| anyhow!("no converter for variant '{variant_name}'"))?;
        let source_key = blob
            .physical_object_key
            .as_deref()
            .ok_or_else(|| anyhow!("blob '{}' has no content", blob.blob_key))?;
        let input = self
            .physical
            .download(source_key)
            .await?
            .ok_or_else(|| anyhow!("physical object '{source_key}' is missing"))?;

        let output = converter.convert(blob, input).await?;
        let physical_key = new_physical_key();
        self.physical.upload_bytes(&physical_key, &output).await?;
        Ok((physical_key, output.len()))
    }

    async fn mark_conversion_success(
        &self,
        claimed: &variant::Model,
        physical_key: &str,
        size: usize,
        duration_ms: i64,
    ) -> Result<(), BlobStorageError> {
        let result = variant::Entity::update_many()
            .col_expr(variant::Column::PhysicalObjectKey, Expr::value(Some(physical_key.to_string())))
            .col_expr(variant::Column::Size, Expr::value(size as i64))
            .col_expr(variant::Column::QueuedForConversion, Expr::value(false))
            .col_expr(variant::Column::ConversionDurationMs, Expr::value(duration_ms))
            .filter(variant::Column::Id.eq(claimed.id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            // Variant vanished while converting, e.g. the content was replaced.
            self.physical.delete(physical_key).await?;
        }
        Ok(())
    }

    async fn mark_conversion_failure(
        &self,
        claimed: &variant::Model,
        duration_ms: i64,
    ) -> Result<(), BlobStorageError> {
        variant::Entity::update_many()
            .col_expr(variant::Column::QueuedForConversion, Expr::value(false))
            .col_expr(variant::Column::ConversionDurationMs, Expr::value(duration_ms))
            .filter(variant::Column::Id.eq(claimed.id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Releases every variant of `blob_id` along with its bytes.
    pub(crate) async fn delete_variants(&self, blob_id: Uuid) -> Result<(), BlobStorageError> {
        let variants = variant::Entity::find()
            .filter(variant::Column::BlobId.eq(blob_id))
            .all(&self.db)
            .await?;

        for found in variants {
            if let Some(key) = &found.physical_object_key {
                self.physical.delete(key).await?;
            }
            variant::Entity::delete_by_id(found.id).exec(&self.db).await?;
        }
        Ok(())
    }
}
