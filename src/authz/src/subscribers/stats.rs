//! Daily allowed/denied counters

use crate::error::Result;
use crate::events::Dispatcher;
use crate::spooler::{Spooler, SpoolerOptions};
use crate::store::{Filter, Repository};
use crate::subscribers::{spawn_check_consumer, SubscriberHandle};
use crate::types::CheckStats;
use chrono::NaiveDate;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Spool check outcomes and add them to the per-day counters in `repo`
pub fn spawn_stats_subscriber(
    dispatcher: &Dispatcher,
    repo: Arc<dyn Repository<CheckStats>>,
    options: SpoolerOptions,
) -> SubscriberHandle {
    let spooler = Spooler::new(
        move |batch: Vec<(NaiveDate, bool)>| {
            let repo = repo.clone();
            async move {
                for (day, counts) in aggregate(&batch) {
                    if let Err(e) = upsert(repo.as_ref(), counts).await {
                        error!("Failed to update check stats for {}: {}", day, e);
                    }
                }
            }
            .boxed()
        },
        options,
    );

    spawn_check_consumer("stats", dispatcher, spooler, |event, check| {
        (event.timestamp.date_naive(), check.allowed)
    })
}

fn aggregate(batch: &[(NaiveDate, bool)]) -> BTreeMap<NaiveDate, CheckStats> {
    let mut days: BTreeMap<NaiveDate, CheckStats> = BTreeMap::new();
    for &(day, allowed) in batch {
        let stats = days.entry(day).or_insert_with(|| CheckStats::new(day));
        if allowed {
            stats.allowed += 1;
        } else {
            stats.denied += 1;
        }
    }
    days
}

async fn upsert(repo: &dyn Repository<CheckStats>, delta: CheckStats) -> Result<()> {
    match repo
        .get_by_fields(&Filter::new().eq("day", delta.day.to_string()))
        .await
    {
        Ok(mut current) => {
            current.allowed += delta.allowed;
            current.denied += delta.denied;
            debug!("Check stats for {}: {} total", current.day, current.total());
            repo.update(current).await
        }
        Err(e) if e.is_not_found() => repo.create(vec![delta]).await,
        Err(e) => Err(e),
    }
}
