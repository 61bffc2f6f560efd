//! The reconciliation job: one pass of authenticate, read, diff and write.
//!
//! Each tick walks the same stages in order and never backtracks:
//!
//! ```text
//! Auth -> ReadUplink -> ReadRecord -> Diff -> (nothing | Upsert) -> (NotifySecondary | skip)
//! ```
//!
//! Any failure before the upsert completes ends the tick at that stage. The
//! secondary notification is best effort and never affects the tick result.
//! Nothing is carried from one tick to the next.

use crate::clients::{ChangeRequest, ControllerApi, LinkedIpNotifier, RecordStore};
use crate::config::Config;
use crate::error::{BeaconError, Result};
use crate::scheduler::ScheduledJob;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Stage of a reconciliation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Auth,
    ReadUplink,
    ReadRecord,
    Diff,
    Upsert,
    NotifySecondary,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Auth => "auth",
            Stage::ReadUplink => "read_uplink",
            Stage::ReadRecord => "read_record",
            Stage::Diff => "diff",
            Stage::Upsert => "upsert",
            Stage::NotifySecondary => "notify_secondary",
        };
        f.write_str(name)
    }
}

/// What happened to the secondary provider after a successful upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryOutcome {
    Notified,
    Failed(String),
    Disabled,
}

/// Terminal state of one tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// The record already held the uplink IP.
    Unchanged { ip: String },
    /// The record was rewritten to the uplink IP.
    Updated {
        previous: String,
        ip: String,
        secondary: SecondaryOutcome,
    },
    /// The tick stopped early.
    Aborted { stage: Stage, error: BeaconError },
}

impl TickOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, TickOutcome::Aborted { .. })
    }
}

/// Settings the job needs on every tick.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub username: String,
    pub password: String,
    pub hosted_zone_id: String,
    pub record_name: String,
    pub upsert_ttl_secs: i64,
    pub update_linked_ip: bool,
}

impl JobSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            username: config.controller.username.clone(),
            password: config.controller.password.clone(),
            hosted_zone_id: config.route53.hosted_zone_id.clone(),
            record_name: config.route53.resource_record_upsert_name.clone(),
            upsert_ttl_secs: i64::from(config.route53.resource_record_upsert_ttl_secs),
            update_linked_ip: config.nextdns.update_linked_ip_enabled,
        }
    }
}

struct TickFailure {
    stage: Stage,
    error: BeaconError,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, TickFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> std::result::Result<T, TickFailure> {
        self.map_err(|error| TickFailure { stage, error })
    }
}

/// Keeps the configured DNS record pointed at the controller's uplink IP.
pub struct ReconciliationJob {
    controller: Arc<dyn ControllerApi>,
    records: Arc<dyn RecordStore>,
    notifier: Arc<dyn LinkedIpNotifier>,
    settings: JobSettings,
}

impl ReconciliationJob {
    pub fn new(
        controller: Arc<dyn ControllerApi>,
        records: Arc<dyn RecordStore>,
        notifier: Arc<dyn LinkedIpNotifier>,
        settings: JobSettings,
    ) -> Self {
        Self {
            controller,
            records,
            notifier,
            settings,
        }
    }

    /// Run one tick. Never fails: every error is logged and reported as
    /// [`TickOutcome::Aborted`].
    pub async fn run(&self) -> TickOutcome {
        let span = tracing::info_span!(
            "reconcile",
            started_at = %chrono::Utc::now().to_rfc3339(),
            record = %self.settings.record_name,
        );

        async {
            match self.reconcile().await {
                Ok(outcome) => outcome,
                Err(TickFailure { stage, error }) => {
                    error!(
                        %stage,
                        zone_id = %self.settings.hosted_zone_id,
                        "Reconciliation tick aborted: {}",
                        error
                    );
                    TickOutcome::Aborted { stage, error }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn reconcile(&self) -> std::result::Result<TickOutcome, TickFailure> {
        let token = self
            .controller
            .authenticate(&self.settings.username, &self.settings.password)
            .await
            .at(Stage::Auth)?;
        if token.is_blank() {
            return Err(BeaconError::AuthenticationFailed("blank session token".to_string()))
                .at(Stage::Auth);
        }

        let uplink_ip = self.controller.uplink_ip(&token).await.at(Stage::ReadUplink)?;
        drop(token);
        if uplink_ip.trim().is_empty() {
            return Err(BeaconError::MalformedResponse("blank uplink IP".to_string()))
                .at(Stage::ReadUplink);
        }
        debug!(ip = %uplink_ip, "Read uplink IP from controller");

        let zone_records = self
            .records
            .list_records(&self.settings.hosted_zone_id)
            .await
            .at(Stage::ReadRecord)?;

        // Only the first matching record, and only its first value, take
        // part in reconciliation.
        let record = zone_records
            .iter()
            .find(|r| r.name == self.settings.record_name)
            .ok_or_else(|| {
                BeaconError::RecordNotFound(format!(
                    "no record named {} in zone {}",
                    self.settings.record_name, self.settings.hosted_zone_id
                ))
            })
            .at(Stage::ReadRecord)?;
        let current = record
            .first_value()
            .ok_or_else(|| {
                BeaconError::RecordNotFound(format!("record {} has no values", record.name))
            })
            .at(Stage::ReadRecord)?;

        if uplink_ip == current {
            debug!(ip = %uplink_ip, "Uplink IP matches DNS record, nothing to update");
            return Ok(TickOutcome::Unchanged { ip: uplink_ip });
        }

        let change = ChangeRequest::upsert(record, uplink_ip.clone(), self.settings.upsert_ttl_secs);
        self.records
            .upsert(&self.settings.hosted_zone_id, &change)
            .await
            .at(Stage::Upsert)?;
        info!(
            previous = %current,
            ip = %uplink_ip,
            ttl = change.ttl,
            "Updated DNS record with uplink IP"
        );

        let secondary = self.notify_secondary(&uplink_ip).await;

        Ok(TickOutcome::Updated {
            previous: current.to_string(),
            ip: uplink_ip,
            secondary,
        })
    }

    async fn notify_secondary(&self, ip: &str) -> SecondaryOutcome {
        if !self.settings.update_linked_ip {
            debug!("Linked IP update disabled, skipping");
            return SecondaryOutcome::Disabled;
        }

        match self.notifier.set_linked_ip(ip).await {
            Ok(()) => SecondaryOutcome::Notified,
            Err(e) => {
                warn!(stage = %Stage::NotifySecondary, "Failed to set linked IP: {}", e);
                SecondaryOutcome::Failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl ScheduledJob for ReconciliationJob {
    fn name(&self) -> &str {
        "reconcile-uplink-ip"
    }

    async fn execute(&self) {
        self.run().await;
    }
}
