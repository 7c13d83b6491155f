use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::MailConfig;
use crate::models::{today, Dish, ServiceError, ServiceResult};
use crate::observability::Metrics;
use crate::repositories::DishRepository;

const SECTION_RULE: &str = "~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~";
const DISH_RULE: &str = "............................................";

/// Plain-text email message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail delivery
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> ServiceResult<()>;
}

/// Mailer that writes messages to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> ServiceResult<()> {
        info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            "Outgoing email:\n{}",
            message.body
        );
        Ok(())
    }
}

/// Build the subject and body of the digest for dishes changed on `date`
pub fn compose_digest(date: NaiveDate, dishes: &[Dish]) -> (String, String) {
    let label = date.format("%-d-%-m-%Y").to_string();
    let subject = format!("{} menu update", label);

    let mut body = format!(
        "{} menu update\n\nNewly created (or modified) dishes:\n{}\n",
        label, SECTION_RULE
    );

    if dishes.is_empty() {
        body.push_str("No new dishes were added (or modified) yesterday.\n");
        body.push_str("Expect next email about todays updates tomorrow.\n");
    }

    for dish in dishes {
        body.push_str(&format!(
            "Name: {}\nDescription: {}\nPrice: ${}\nPreparation time: {} min\nIs vegetarian: {}\n{}\n",
            dish.title,
            dish.description,
            dish.price,
            dish.time_minutes,
            if dish.vegetarian { "Yes" } else { "No" },
            DISH_RULE
        ));
    }

    (subject, body)
}

/// Time left until the next occurrence of `hour`:00 UTC after `now`
pub fn duration_until_next_run(now: DateTime<Utc>, hour: u32) -> Duration {
    let run_today = now
        .date_naive()
        .and_hms_opt(hour.min(23), 0, 0)
        .map(|naive| naive.and_utc());

    let next = match run_today {
        Some(run) if run > now => run,
        Some(run) => run + chrono::Duration::days(1),
        None => now + chrono::Duration::days(1),
    };

    (next - now).to_std().unwrap_or(Duration::from_secs(60 * 60 * 24))
}

/// Daily email listing the dishes created or modified the previous day
pub struct DigestService {
    dishes: Arc<dyn DishRepository>,
    mailer: Arc<dyn Mailer>,
    sender: String,
    recipients: Vec<String>,
    metrics: Option<Arc<Metrics>>,
}

impl DigestService {
    pub fn new(dishes: Arc<dyn DishRepository>, mailer: Arc<dyn Mailer>, config: &MailConfig) -> Self {
        Self {
            dishes,
            mailer,
            sender: config.email_host_user.clone(),
            recipients: config.recipients(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Mail the digest for `date` to every recipient; returns how many were sent
    #[instrument(skip(self), fields(date = %date, recipients = self.recipients.len()))]
    pub async fn send_digest_for(&self, date: NaiveDate) -> ServiceResult<usize> {
        if self.recipients.is_empty() {
            info!("No digest recipients configured, skipping");
            return Ok(0);
        }

        let mut dishes = self.dishes.find_changed_on(date).await?;
        dishes.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));

        let (subject, body) = compose_digest(date, &dishes);
        crate::info_with_trace!(dishes = dishes.len(), "Sending dish digest");

        let mut sent = 0;
        let mut last_error = None;

        for recipient in &self.recipients {
            let message = EmailMessage {
                from: self.sender.clone(),
                to: recipient.clone(),
                subject: subject.clone(),
                body: body.clone(),
            };

            let result = self.mailer.send(&message).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_digest_email(result.is_ok());
            }

            match result {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "Failed to send digest email");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if sent == 0 => Err(ServiceError::ExternalService {
                service: "mail".to_string(),
                message: e.to_string(),
            }),
            _ => Ok(sent),
        }
    }

    /// Send the digest covering yesterday (UTC)
    pub async fn send_daily_digest(&self) -> ServiceResult<usize> {
        let yesterday = today()
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| ServiceError::Configuration {
                message: "Cannot compute the previous day".to_string(),
            })?;
        self.send_digest_for(yesterday).await
    }

    /// Run the digest every day at `hour`:00 UTC until the task is aborted
    pub fn spawn_scheduler(self: Arc<Self>, hour: u32) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = duration_until_next_run(Utc::now(), hour);
                info!(
                    hour,
                    wait_seconds = wait.as_secs(),
                    "Next dish digest scheduled"
                );
                tokio::time::sleep(wait).await;

                match self.send_daily_digest().await {
                    Ok(sent) => info!(sent, "Dish digest completed"),
                    Err(e) => crate::error_with_trace!(error = %e, "Dish digest failed"),
                }
            }
        })
    }
}
