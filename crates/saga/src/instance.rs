//! Saga execution record.

use common::{OrderId, SagaId, UserId};
use serde::{Deserialize, Serialize};

use crate::checkout;
use crate::events::{SagaEvent, StockReservedData};
use crate::state::SagaState;

/// The state of one checkout run, rebuilt by applying [`SagaEvent`]s.
///
/// Tracks which steps have committed so the coordinator can drive
/// compensation from the record instead of from the failing branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaInstance {
    id: Option<SagaId>,
    user_id: Option<UserId>,
    saga_type: String,
    order_id: Option<OrderId>,
    state: SagaState,
    current_step: Option<String>,
    completed_steps: Vec<String>,
    /// Stock decrements sent to the ledger, whether or not they landed.
    requested: Vec<StockReservedData>,
    /// Stock decrements confirmed by the ledger, in application order.
    reservations: Vec<StockReservedData>,
    failed_step: Option<String>,
    failure_reason: Option<String>,
    compensation_failures: usize,
}

impl SagaInstance {
    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.user_id = Some(data.user_id);
                self.saga_type = data.saga_type;
                self.state = SagaState::Preparing;
            }
            SagaEvent::StepStarted(data) => {
                self.current_step = Some(data.step_name);
            }
            SagaEvent::StepCompleted(data) => {
                if let Some(order_id) = data.order_id {
                    self.order_id = Some(order_id);
                }
                if data.step_name == checkout::STEP_CREATE_ORDER {
                    self.state = self.state.commit();
                }
                self.completed_steps.push(data.step_name);
                self.current_step = None;
            }
            SagaEvent::StockRequested(data) => {
                self.requested.push(data);
            }
            SagaEvent::StockReserved(data) => {
                self.reservations.push(data);
            }
            SagaEvent::StepFailed(data) => {
                self.failed_step = Some(data.step_name);
                self.failure_reason = Some(data.error);
                self.current_step = None;
            }
            SagaEvent::CompensationStarted(_) => {
                self.state = self.state.on_failure();
            }
            SagaEvent::CompensationStepCompleted(_) => {}
            SagaEvent::CompensationStepFailed(_) => {
                self.compensation_failures += 1;
            }
            SagaEvent::SagaCompleted(_) => {
                self.state = SagaState::Completed;
            }
            SagaEvent::SagaFailed(data) => {
                self.state = SagaState::Failed;
                self.failure_reason = Some(data.reason);
            }
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn id(&self) -> Option<SagaId> {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Returns the order created by this run, once the commit point is passed.
    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    /// Returns the step currently executing, if any.
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn is_step_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    /// Returns true once the order header exists and the run may no longer
    /// be abandoned without compensation.
    pub fn is_committed(&self) -> bool {
        self.is_step_completed(checkout::STEP_CREATE_ORDER)
    }

    /// Decrements that may have been applied: everything sent, including
    /// calls whose response never arrived.
    pub fn requested_stock(&self) -> &[StockReservedData] {
        &self.requested
    }

    pub fn reservations(&self) -> &[StockReservedData] {
        &self.reservations
    }

    pub fn failed_step(&self) -> Option<&str> {
        self.failed_step.as_deref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn compensation_failures(&self) -> usize {
        self.compensation_failures
    }

    /// Steps whose effects must be undone, most recent first.
    ///
    /// The failed step is included because it may have committed part of its
    /// work (some but not all stock decrements).
    pub fn steps_to_compensate(&self) -> Vec<String> {
        let mut steps = self.completed_steps.clone();
        if let Some(failed) = &self.failed_step
            && !steps.contains(failed)
        {
            steps.push(failed.clone());
        }
        steps.reverse();
        steps
    }
}
