//! Reminder settings and alarm re-arming.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AlarmScheduler, Notifier};
use crate::db::PreferencesStore;
use crate::errors::AppError;
use crate::models::{
    ReminderSettings, UpdateReminderRequest, DEFAULT_REMINDER_HOUR, DEFAULT_REMINDER_MINUTE,
};

const REMINDER_ENABLED_KEY: &str = "daily_reminder_enabled";
const REMINDER_HOUR_KEY: &str = "daily_reminder_hour";
const REMINDER_MINUTE_KEY: &str = "daily_reminder_minute";

const NOTIFICATION_TITLE: &str = "Daily reminder";
const NOTIFICATION_BODY: &str = "Time to write about your day.";

/// Next `hour:minute` strictly after `now`, in `now`'s offset.
pub fn next_trigger(
    now: DateTime<FixedOffset>,
    hour: u32,
    minute: u32,
) -> Result<DateTime<FixedOffset>, AppError> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| AppError::Validation(format!("Invalid reminder time {}:{}", hour, minute)))?;
    let today = now
        .date_naive()
        .and_time(time)
        .and_local_timezone(*now.offset())
        .single()
        .ok_or_else(|| AppError::Internal("Ambiguous reminder time".to_string()))?;

    Ok(if today > now {
        today
    } else {
        today + Duration::days(1)
    })
}

pub struct ReminderService {
    prefs: PreferencesStore,
    scheduler: Arc<dyn AlarmScheduler>,
    notifier: Arc<dyn Notifier>,
    offset: FixedOffset,
}

impl ReminderService {
    pub fn new(
        prefs: PreferencesStore,
        scheduler: Arc<dyn AlarmScheduler>,
        notifier: Arc<dyn Notifier>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            prefs,
            scheduler,
            notifier,
            offset,
        }
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub async fn settings(&self) -> Result<ReminderSettings, AppError> {
        Ok(ReminderSettings {
            enabled: self.prefs.get_bool(REMINDER_ENABLED_KEY, false).await?,
            hour: self
                .prefs
                .get_u32(REMINDER_HOUR_KEY, DEFAULT_REMINDER_HOUR)
                .await?,
            minute: self
                .prefs
                .get_u32(REMINDER_MINUTE_KEY, DEFAULT_REMINDER_MINUTE)
                .await?,
        })
    }

    pub async fn update(&self, request: UpdateReminderRequest) -> Result<ReminderSettings, AppError> {
        self.update_at(request, self.now()).await
    }

    pub(crate) async fn update_at(
        &self,
        request: UpdateReminderRequest,
        now: DateTime<FixedOffset>,
    ) -> Result<ReminderSettings, AppError> {
        let current = self.settings().await?;
        let hour = request.hour.unwrap_or(current.hour);
        let minute = request.minute.unwrap_or(current.minute);
        if hour > 23 || minute > 59 {
            return Err(AppError::Validation(format!(
                "Invalid reminder time {}:{}",
                hour, minute
            )));
        }

        self.prefs.save_u32(REMINDER_HOUR_KEY, hour).await?;
        self.prefs.save_u32(REMINDER_MINUTE_KEY, minute).await?;
        self.prefs
            .save_bool(REMINDER_ENABLED_KEY, request.enabled)
            .await?;

        if request.enabled {
            self.scheduler.schedule(next_trigger(now, hour, minute)?);
        } else {
            self.scheduler.cancel();
        }

        Ok(ReminderSettings {
            enabled: request.enabled,
            hour,
            minute,
        })
    }

    /// Re-arm the alarm after a restart. Returns the scheduled time, if enabled.
    pub async fn on_boot(&self) -> Result<Option<DateTime<FixedOffset>>, AppError> {
        self.on_boot_at(self.now()).await
    }

    pub(crate) async fn on_boot_at(
        &self,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<DateTime<FixedOffset>>, AppError> {
        let settings = self.settings().await?;
        if !settings.enabled {
            return Ok(None);
        }
        let at = next_trigger(now, settings.hour, settings.minute)?;
        self.scheduler.schedule(at);
        Ok(Some(at))
    }

    /// Handle a fired alarm: notify and arm the next occurrence of the stored
    /// time, unless the reminder was switched off in the meantime.
    pub async fn on_alarm(
        &self,
        fired_at: DateTime<FixedOffset>,
    ) -> Result<Option<DateTime<FixedOffset>>, AppError> {
        self.on_alarm_at(fired_at, self.now()).await
    }

    pub(crate) async fn on_alarm_at(
        &self,
        fired_at: DateTime<FixedOffset>,
        now: DateTime<FixedOffset>,
    ) -> Result<Option<DateTime<FixedOffset>>, AppError> {
        let settings = self.settings().await?;
        if !settings.enabled {
            tracing::debug!("Ignoring reminder alarm for {}: disabled", fired_at);
            return Ok(None);
        }
        self.notifier.notify(NOTIFICATION_TITLE, NOTIFICATION_BODY);
        // Uses the stored time, which may have moved since this alarm was armed.
        let next = next_trigger(now, settings.hour, settings.minute)?;
        self.scheduler.schedule(next);
        Ok(Some(next))
    }

    /// Switch the reminder off and drop any pending alarm; the stored time is kept.
    pub async fn disable(&self) -> Result<ReminderSettings, AppError> {
        self.prefs.save_bool(REMINDER_ENABLED_KEY, false).await?;
        self.scheduler.cancel();
        Ok(ReminderSettings {
            enabled: false,
            ..self.settings().await?
        })
    }

    /// Handle alarms from `fired` until the channel closes.
    pub fn run(
        self: Arc<Self>,
        mut fired: mpsc::UnboundedReceiver<DateTime<FixedOffset>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(at) = fired.recv().await {
                if let Err(e) = self.on_alarm(at).await {
                    tracing::error!("Failed to handle reminder alarm: {}", e);
                }
            }
        })
    }
}
