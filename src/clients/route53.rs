//! AWS Route 53 record store.

use super::{ChangeRequest, RecordSet, RecordStore};
use crate::config::Route53Config;
use crate::error::{BeaconError, Result};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_route53::config::{Credentials, Region};
use aws_sdk_route53::error::DisplayErrorContext;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};

const CREDENTIALS_PROVIDER_NAME: &str = "beacon-config";

/// Route 53 record store.
///
/// SDK configuration (region, credentials, timeouts) is resolved once; each
/// call builds its own SDK client from it.
pub struct Route53RecordStore {
    sdk_config: SdkConfig,
}

impl Route53RecordStore {
    /// Resolve SDK configuration from beacon's Route 53 settings.
    ///
    /// Empty access/secret keys fall back to the default AWS credential chain.
    pub async fn new(config: &Route53Config) -> Self {
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(config.timeout())
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .timeout_config(timeouts);

        if !config.access_key.is_empty() && !config.secret_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                CREDENTIALS_PROVIDER_NAME,
            ));
        }

        Self::from_sdk_config(loader.load().await)
    }

    pub fn from_sdk_config(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }

    fn client(&self) -> aws_sdk_route53::Client {
        aws_sdk_route53::Client::new(&self.sdk_config)
    }
}

#[async_trait]
impl RecordStore for Route53RecordStore {
    async fn list_records(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        let client = self.client();
        let mut records = Vec::new();
        let mut start_name: Option<String> = None;
        let mut start_type: Option<RrType> = None;
        let mut start_identifier: Option<String> = None;

        loop {
            let page = client
                .list_resource_record_sets()
                .hosted_zone_id(zone_id)
                .set_start_record_name(start_name.take())
                .set_start_record_type(start_type.take())
                .set_start_record_identifier(start_identifier.take())
                .send()
                .await
                .map_err(|e| provider_error("list record sets", e))?;

            records.extend(page.resource_record_sets().iter().map(RecordSet::from));

            if !page.is_truncated() {
                break;
            }

            start_name = page.next_record_name().map(str::to_string);
            start_type = page.next_record_type().cloned();
            start_identifier = page.next_record_identifier().map(str::to_string);

            if start_name.is_none() {
                break;
            }
        }

        tracing::debug!("Listed {} record sets in zone {}", records.len(), zone_id);
        Ok(records)
    }

    async fn upsert(&self, zone_id: &str, change: &ChangeRequest) -> Result<()> {
        let batch = change_batch(change)?;

        let output = self
            .client()
            .change_resource_record_sets()
            .hosted_zone_id(zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| provider_error("change record sets", e))?;

        tracing::debug!(
            change_info = ?output.change_info(),
            "Route 53 accepted upsert of {}",
            change.name
        );
        Ok(())
    }
}

impl From<&ResourceRecordSet> for RecordSet {
    fn from(rrs: &ResourceRecordSet) -> Self {
        Self {
            name: rrs.name().to_string(),
            record_type: rrs.r#type().as_str().to_string(),
            ttl: rrs.ttl(),
            values: rrs
                .resource_records()
                .iter()
                .map(|r| r.value().to_string())
                .collect(),
        }
    }
}

/// Translate a change request into a one-change UPSERT batch.
fn change_batch(change: &ChangeRequest) -> Result<ChangeBatch> {
    let record = ResourceRecord::builder()
        .value(&change.value)
        .build()
        .map_err(build_error)?;

    let record_set = ResourceRecordSet::builder()
        .name(&change.name)
        .r#type(RrType::from(change.record_type.as_str()))
        .ttl(change.ttl)
        .resource_records(record)
        .build()
        .map_err(build_error)?;

    let upsert = Change::builder()
        .action(ChangeAction::Upsert)
        .resource_record_set(record_set)
        .build()
        .map_err(build_error)?;

    ChangeBatch::builder()
        .changes(upsert)
        .build()
        .map_err(build_error)
}

fn build_error(e: aws_sdk_route53::error::BuildError) -> BeaconError {
    BeaconError::ProviderRejected(format!("invalid change request: {}", e))
}

fn provider_error<E>(operation: &str, e: E) -> BeaconError
where
    E: std::error::Error + 'static,
{
    BeaconError::ProviderRejected(format!("{}: {}", operation, DisplayErrorContext(e)))
}
