//! In-process scheduler for deferred tasks.
//!
//! Every schedule owns one tokio timer task. When the timer fires, the registered
//! [`TaskCallback`] receives the schedule's description. One-shot schedules are
//! forgotten after firing; cron schedules re-arm on their next occurrence.
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use croner::Cron;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::errors::{AgentError, AgentResult};
use crate::models::message::generate_id;
use crate::prompt_template::load_prompt_file;

/// When a task should run, as requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum When {
    Scheduled {
        date: DateTime<Utc>,
    },
    Delayed {
        #[serde(rename = "delayInSeconds", deserialize_with = "whole_seconds")]
        delay_in_seconds: u64,
    },
    Cron {
        cron: String,
    },
    NoSchedule,
}

/// Models often send `600.0` for a JSON number, so fractional seconds are rounded
fn whole_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(seconds) = number.as_u64() {
        return Ok(seconds);
    }
    match number.as_f64() {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 && seconds < u64::MAX as f64 => {
            Ok(seconds.round() as u64)
        }
        _ => Err(D::Error::custom(format!(
            "invalid delay in seconds: {}",
            number
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ScheduleKind {
    Scheduled,
    Delayed {
        #[serde(rename = "delayInSeconds")]
        delay_in_seconds: u64,
    },
    Cron {
        cron: String,
    },
}

/// A deferred task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub description: String,
    #[serde(flatten)]
    pub kind: ScheduleKind,
    /// Next time the task fires
    pub time: DateTime<Utc>,
}

/// Receives fired schedules
#[async_trait]
pub trait TaskCallback: Send + Sync {
    async fn execute_task(&self, description: &str, schedule: &Schedule) -> AgentResult<()>;
}

struct Entry {
    schedule: Schedule,
    timer: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

pub struct Scheduler {
    entries: Entries,
    callback: Weak<dyn TaskCallback>,
    clock: SharedClock,
}

impl Scheduler {
    pub fn new(callback: Weak<dyn TaskCallback>, clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            callback,
            clock,
        }
    }

    /// Create a schedule and arm its timer
    pub fn schedule(&self, when: &When, description: &str) -> AgentResult<Schedule> {
        let now = self.clock.now();
        let (kind, time) = match when {
            When::Scheduled { date } => (ScheduleKind::Scheduled, *date),
            When::Delayed { delay_in_seconds } => {
                let time = i64::try_from(*delay_in_seconds)
                    .ok()
                    .and_then(ChronoDuration::try_seconds)
                    .and_then(|delay| now.checked_add_signed(delay))
                    .ok_or_else(|| {
                        AgentError::Schedule(format!("delay out of range: {}", delay_in_seconds))
                    })?;
                (
                    ScheduleKind::Delayed {
                        delay_in_seconds: *delay_in_seconds,
                    },
                    time,
                )
            }
            When::Cron { cron } => (
                ScheduleKind::Cron { cron: cron.clone() },
                next_cron_time(cron, now)?,
            ),
            When::NoSchedule => {
                return Err(AgentError::Schedule(
                    "no schedule time was given".to_string(),
                ))
            }
        };

        let schedule = Schedule {
            id: generate_id(),
            description: description.to_string(),
            kind,
            time,
        };

        // Hold the lock while arming so a zero delay timer cannot finish before its entry exists
        let mut entries = self.lock_entries()?;
        let timer = self.arm(schedule.clone());
        entries.insert(
            schedule.id.clone(),
            Entry {
                schedule: schedule.clone(),
                timer,
            },
        );
        drop(entries);

        info!(id = %schedule.id, time = %schedule.time, "scheduled task: {}", description);
        Ok(schedule)
    }

    /// All pending schedules, soonest first
    pub fn list(&self) -> AgentResult<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = self
            .lock_entries()?
            .values()
            .map(|entry| entry.schedule.clone())
            .collect();
        schedules.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(schedules)
    }

    pub fn get(&self, id: &str) -> AgentResult<Option<Schedule>> {
        Ok(self
            .lock_entries()?
            .get(id)
            .map(|entry| entry.schedule.clone()))
    }

    /// Cancel a schedule, returning false if it does not exist
    pub fn cancel(&self, id: &str) -> AgentResult<bool> {
        match self.lock_entries()?.remove(id) {
            Some(entry) => {
                entry.timer.abort();
                info!(id = %id, "cancelled scheduled task");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn lock_entries(&self) -> AgentResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| AgentError::Internal("scheduler state poisoned".to_string()))
    }

    fn arm(&self, schedule: Schedule) -> JoinHandle<()> {
        let entries = self.entries.clone();
        let callback = self.callback.clone();
        let clock = self.clock.clone();

        tokio::spawn(async move {
            let mut schedule = schedule;
            loop {
                let wait = (schedule.time - clock.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;

                let Some(callback) = callback.upgrade() else {
                    debug!(id = %schedule.id, "task owner is gone, dropping schedule");
                    break;
                };
                info!(id = %schedule.id, "running scheduled task: {}", schedule.description);
                if let Err(e) = callback.execute_task(&schedule.description, &schedule).await {
                    warn!(id = %schedule.id, "scheduled task failed: {}", e);
                }

                let ScheduleKind::Cron { cron } = &schedule.kind else {
                    break;
                };
                match next_cron_time(cron, clock.now()) {
                    Ok(next) => {
                        schedule.time = next;
                        if let Ok(mut entries) = entries.lock() {
                            match entries.get_mut(&schedule.id) {
                                Some(entry) => entry.schedule.time = next,
                                None => return,
                            }
                        }
                    }
                    Err(e) => {
                        warn!(id = %schedule.id, "cannot re-arm cron schedule: {}", e);
                        break;
                    }
                }
            }

            if let Ok(mut entries) = entries.lock() {
                entries.remove(&schedule.id);
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(entries) = self.entries.lock() {
            for entry in entries.values() {
                entry.timer.abort();
            }
        }
    }
}

/// Next occurrence of a cron expression strictly after `after`
pub fn next_cron_time(expression: &str, after: DateTime<Utc>) -> AgentResult<DateTime<Utc>> {
    let cron = Cron::new(expression)
        .parse()
        .map_err(|e| AgentError::Schedule(format!("invalid cron expression '{}': {}", expression, e)))?;
    cron.find_next_occurrence(&after, false)
        .map_err(|e| AgentError::Schedule(format!("no next occurrence for '{}': {}", expression, e)))
}

#[derive(Serialize)]
struct SchedulePromptContext {
    now: String,
    example_date: String,
}

/// Scheduling context injected into the system prompt
pub fn schedule_prompt(now: DateTime<Utc>) -> AgentResult<String> {
    let context = SchedulePromptContext {
        now: now.to_rfc2822(),
        example_date: (now + ChronoDuration::days(1)).format("%Y-%m-%d").to_string(),
    };
    load_prompt_file("schedule.md", &context).map_err(|e| AgentError::Internal(e.to_string()))
}
