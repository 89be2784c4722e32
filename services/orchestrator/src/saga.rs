//! The per-request pairing saga.
//!
//! Submit the pair job, watch its allocation to `running`, barrier on the
//! health-checked services, then resolve addresses for every declared
//! service. Each stage produces an immutable [`Decision`]; the saga never
//! touches the store or the queue itself. The dispatcher applies the
//! decision, which keeps this logic independent of where request state
//! lives and lets tests assert on decisions directly.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::classifier::{classify_allocation, classify_services, Disposition};
use crate::discovery::{CheckStatus, DiscoveryApi};
use crate::job::DeclaredService;
use crate::request::RequestState;
use crate::resolver::{resolve_all, AddressResolver};
use crate::scheduler::{prepare_submit, Job, SchedulerApi, SchedulerError};
use crate::watch::{watch_allocation_to_resolution, watch_service_to_resolution};

/// What should happen to a request as the result of one pairing attempt.
/// Pure data; the dispatcher is the only thing that acts on it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// Write the mutated request record back (CAS, lost race abandoned).
    pub update_store: bool,
    /// Delete the request record; the eviction cascade cleans up the rest.
    pub remove_user: bool,
    /// New lifecycle state for the request, when it changes.
    pub new_state: Option<RequestState>,
    /// Resolved address map to attach under the given key, on full success.
    pub services: Option<(String, BTreeMap<String, String>)>,
}

impl Decision {
    /// Another replica owns this attempt; touch nothing.
    pub fn abandoned() -> Self {
        Decision::default()
    }

    /// Map a failure classification onto a decision.
    pub fn from_disposition(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Permanent => {
                Decision { update_store: true, remove_user: true, ..Decision::default() }
            }
            Disposition::Pending => Decision::default(),
            Disposition::Restart => Decision {
                update_store: true,
                new_state: Some(RequestState::Waiting),
                ..Decision::default()
            },
        }
    }
}

/// One pairing attempt's inputs.
pub struct SagaInput {
    pub job: Job,
    pub declared: Vec<DeclaredService>,
    pub allocation_budget: Duration,
    pub health_budget: Duration,
    /// State the request is promoted to on full success.
    pub success_state: RequestState,
    /// Key the resolved address map is attached under.
    pub services_key: String,
}

/// The per-request orchestration saga over the external collaborators.
pub struct AllocationOrchestrator<'a> {
    pub scheduler: &'a dyn SchedulerApi,
    pub discovery: &'a dyn DiscoveryApi,
    pub resolver: &'a dyn AddressResolver,
}

impl AllocationOrchestrator<'_> {
    /// Run the saga for `request_id`. Scheduler transport errors during
    /// submission propagate (the attempt re-runs on the next
    /// notification); everything after submission resolves to a decision.
    pub async fn run(&self, request_id: &str, input: SagaInput) -> Result<Decision, SchedulerError> {
        let job_name = input.job.name.clone();

        // Conditional submit. A lost race means another replica is already
        // driving this request; back off without deciding anything.
        let slot = prepare_submit(self.scheduler, &job_name).await?;
        if !slot.submit(&input.job).await? {
            info!(request = %request_id, job = %job_name, "lost submit race, abandoning attempt");
            return Ok(Decision::abandoned());
        }

        // Allocation must reach `running` within its budget.
        let deadline = Instant::now() + input.allocation_budget;
        let allocation =
            watch_allocation_to_resolution(self.scheduler, &job_name, deadline).await;
        match &allocation {
            Some(alloc) if alloc.client_status == crate::scheduler::ClientStatus::Running => {}
            observed => {
                for (task, message) in observed.iter().flat_map(|a| a.task_events()) {
                    warn!(request = %request_id, task = %task, event = %message, "task history");
                }
                let disposition = classify_allocation(observed.as_ref());
                warn!(
                    request = %request_id,
                    job = %job_name,
                    status = ?observed.as_ref().map(|a| a.client_status),
                    ?disposition,
                    "allocation did not reach running within budget"
                );
                return Ok(Decision::from_disposition(disposition));
            }
        }

        // Health barrier over the checked services. All must be passing;
        // an absent check fails the barrier like an unhealthy one.
        let health_deadline = Instant::now() + input.health_budget;
        let checked: Vec<&str> = input
            .declared
            .iter()
            .filter(|s| s.checked)
            .map(|s| s.name.as_str())
            .collect();
        let observed = join_all(checked.iter().map(|service| {
            watch_service_to_resolution(self.discovery, service, health_deadline)
        }))
        .await;

        let all_passing = observed
            .iter()
            .all(|check| matches!(check, Some(c) if c.status == CheckStatus::Passing));
        if !all_passing {
            for (service, check) in checked.iter().zip(&observed) {
                let status = check.as_ref().map(|c| c.status);
                let output = check.as_ref().map(|c| c.output.as_str()).unwrap_or("no check seen");
                warn!(request = %request_id, service = %service, ?status, output, "health barrier failed");
            }
            return Ok(Decision::from_disposition(classify_services(&observed)));
        }

        // Addresses for every declared service, checked or not. One
        // failure aborts the pairing; a partial map is never persisted.
        let names: Vec<String> = input.declared.iter().map(|s| s.name.clone()).collect();
        let addresses = match resolve_all(self.resolver, &names).await {
            Ok(map) => map,
            Err(e) => {
                warn!(request = %request_id, error = %e, "address resolution failed, evicting");
                return Ok(Decision {
                    update_store: true,
                    remove_user: true,
                    ..Decision::default()
                });
            }
        };

        info!(request = %request_id, job = %job_name, services = addresses.len(), "pairing healthy");
        Ok(Decision {
            update_store: true,
            remove_user: false,
            new_state: Some(input.success_state),
            services: Some((input.services_key, addresses)),
        })
    }
}
