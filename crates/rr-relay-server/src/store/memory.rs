// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use super::{apply_status, RunStore, StatusDetail};
use crate::error::PersistenceError;
use async_trait::async_trait;
use rr_domain_types::{Automation, Principal, RunRecord, RunStatus, Step};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory run store (for development/testing)
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, RunRecord>>,
    automations: RwLock<HashMap<String, Automation>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a run, replacing any run with the same id
    pub async fn insert_run(&self, run: RunRecord) {
        self.runs.write().await.insert(run.id.clone(), run);
    }

    pub async fn insert_automation(&self, automation: Automation) {
        self.automations
            .write()
            .await
            .insert(automation.id.clone(), automation);
    }

    /// Current record regardless of owner
    pub async fn snapshot(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// All runs owned by `principal`
    pub async fn runs_for(&self, principal: &Principal) -> Vec<RunRecord> {
        self.runs
            .read()
            .await
            .values()
            .filter(|run| &run.owner == principal)
            .cloned()
            .collect()
    }
}

fn owned_by<'a>(
    runs: &'a mut HashMap<String, RunRecord>,
    run_id: &str,
    principal: &Principal,
) -> Result<&'a mut RunRecord, PersistenceError> {
    runs.get_mut(run_id)
        .filter(|run| &run.owner == principal)
        .ok_or_else(|| PersistenceError::run_not_found(run_id))
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn fetch_run(
        &self,
        run_id: &str,
        principal: &Principal,
    ) -> Result<RunRecord, PersistenceError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .filter(|run| &run.owner == principal)
            .cloned()
            .ok_or_else(|| PersistenceError::run_not_found(run_id))
    }

    async fn update_status(
        &self,
        run_id: &str,
        principal: &Principal,
        status: RunStatus,
        detail: StatusDetail,
    ) -> Result<(), PersistenceError> {
        let mut runs = self.runs.write().await;
        let run = owned_by(&mut runs, run_id, principal)?;
        apply_status(run, status, detail)
    }

    async fn append_step(
        &self,
        run_id: &str,
        principal: &Principal,
        step: &Step,
    ) -> Result<(), PersistenceError> {
        let mut runs = self.runs.write().await;
        let run = owned_by(&mut runs, run_id, principal)?;
        run.steps.retain(|existing| existing.step_number != step.step_number);
        run.steps.push(step.clone());
        Ok(())
    }

    async fn fetch_automation(
        &self,
        automation_id: &str,
        principal: &Principal,
    ) -> Result<Automation, PersistenceError> {
        self.automations
            .read()
            .await
            .get(automation_id)
            .filter(|automation| &automation.owner == principal)
            .cloned()
            .ok_or_else(|| PersistenceError::automation_not_found(automation_id))
    }

    async fn create_run(
        &self,
        principal: &Principal,
        objective: &str,
    ) -> Result<RunRecord, PersistenceError> {
        let run = RunRecord::pending(
            uuid::Uuid::new_v4().to_string(),
            principal.clone(),
            objective,
        );
        self.insert_run(run.clone()).await;
        Ok(run)
    }
}
